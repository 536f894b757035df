use std::fmt;
use std::process::Command;

const QUERY_FIELDS: &str = "index,name,memory.total,memory.used,utilization.gpu";

/// One NVIDIA device as reported by nvidia-smi
#[derive(Debug, Clone, PartialEq)]
pub struct GpuSnapshot {
    pub index: u32,
    pub name: String,
    pub vram_total_mb: u64,
    pub vram_used_mb: u64,
    pub utilization_percent: f32,
}

impl GpuSnapshot {
    pub fn vram_free_mb(&self) -> u64 {
        self.vram_total_mb.saturating_sub(self.vram_used_mb)
    }
}

impl fmt::Display for GpuSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({}/{} MB, {:.0}%)",
            self.index, self.name, self.vram_used_mb, self.vram_total_mb, self.utilization_percent
        )
    }
}

/// The device Wgpu will train on, if nvidia-smi reports any.
/// `None` selects the NdArray CPU backend.
pub fn detect_nvidia_gpu() -> Option<GpuSnapshot> {
    list_gpus().into_iter().next()
}

/// Fresh figures for the training device, logged alongside each export.
pub fn poll_gpu_stats() -> Option<GpuSnapshot> {
    detect_nvidia_gpu()
}

fn list_gpus() -> Vec<GpuSnapshot> {
    let output = match Command::new("nvidia-smi")
        .arg(format!("--query-gpu={QUERY_FIELDS}"))
        .arg("--format=csv,noheader,nounits")
        .output()
    {
        Ok(output) if output.status.success() => output,
        _ => return Vec::new(),
    };

    parse_gpu_table(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `index, name, total, used, utilization` rows; malformed rows are skipped.
fn parse_gpu_table(table: &str) -> Vec<GpuSnapshot> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(',').map(str::trim);
            let index = fields.next()?.parse().ok()?;
            let name = fields.next().filter(|n| !n.is_empty())?.to_string();
            let vram_total_mb = fields.next()?.parse().unwrap_or(0);
            let vram_used_mb = fields.next()?.parse().unwrap_or(0);
            // "[N/A]" on some virtualised devices
            let utilization_percent = fields.next()?.parse().unwrap_or(0.0);
            Some(GpuSnapshot {
                index,
                name,
                vram_total_mb,
                vram_used_mb,
                utilization_percent,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gpu_table() {
        let gpus = parse_gpu_table("0, NVIDIA A100-SXM4-40GB, 40960, 1024, 37\n1, NVIDIA A100-SXM4-40GB, 40960, 0, [N/A]\n");
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].name, "NVIDIA A100-SXM4-40GB");
        assert_eq!(gpus[0].vram_free_mb(), 39936);
        assert_eq!(gpus[0].utilization_percent, 37.0);
        assert_eq!(gpus[1].index, 1);
        assert_eq!(gpus[1].utilization_percent, 0.0);
        assert_eq!(gpus[0].to_string(), "#0 NVIDIA A100-SXM4-40GB (1024/40960 MB, 37%)");
    }

    #[test]
    fn test_parse_gpu_table_skips_malformed_rows() {
        assert!(parse_gpu_table("").is_empty());
        assert!(parse_gpu_table("0, GPU, 1").is_empty());
        assert!(parse_gpu_table("x, GPU, 1, 1, 1").is_empty());
        assert!(parse_gpu_table("0, , 1, 1, 1").is_empty());
    }
}
