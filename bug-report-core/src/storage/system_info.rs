use std::time::Duration;

use crate::models::report::{MetadataField, SystemMetadata};

/// Facts only the host application knows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub engine_version: Option<String>,
    pub gpu_model: Option<String>,
}

/// Collects the fixed metadata field set for a report.
///
/// Fields that cannot be determined on this platform are recorded as
/// unavailable.
pub fn collect(host: &HostInfo, session_duration: Duration) -> SystemMetadata {
    let mut metadata = SystemMetadata::new();

    metadata.set_optional(MetadataField::EngineVersion, host.engine_version.clone());
    metadata.set(MetadataField::ReporterVersion, env!("CARGO_PKG_VERSION"));
    metadata.set(MetadataField::OperatingSystem, std::env::consts::OS);
    metadata.set(MetadataField::OsFamily, std::env::consts::FAMILY);
    metadata.set(MetadataField::Architecture, std::env::consts::ARCH);
    metadata.set_optional(
        MetadataField::CpuCores,
        std::thread::available_parallelism().ok().map(|n| n.to_string()),
    );
    metadata.set_optional(MetadataField::CpuModel, cpu_model());
    metadata.set_optional(MetadataField::GpuModel, host.gpu_model.clone());
    metadata.set_optional(MetadataField::TotalMemoryBytes, total_memory_bytes().map(|b| b.to_string()));
    metadata.set(MetadataField::CapturedAt, chrono::Utc::now().to_rfc3339());
    metadata.set(
        MetadataField::SessionDurationSecs,
        format!("{:.3}", session_duration.as_secs_f64()),
    );

    metadata
}

#[cfg(target_os = "linux")]
fn cpu_model() -> Option<String> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    parse_cpu_model(&cpuinfo)
}

#[cfg(not(target_os = "linux"))]
fn cpu_model() -> Option<String> {
    None
}

#[cfg(target_os = "linux")]
fn total_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_total(&meminfo)
}

#[cfg(not(target_os = "linux"))]
fn total_memory_bytes() -> Option<u64> {
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "model name")
        .map(|(_, value)| value.trim().to_string())
        .filter(|model| !model.is_empty())
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mem_total(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}
