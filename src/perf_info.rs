use tracing::info;

pub fn logical_cpus() -> usize {
    num_cpus::get()
}

/// Log the machine the timings come from.
pub fn write_host_info() {
    info!(
        "host: {}/{}, {} logical cpus, {} physical cores",
        std::env::consts::OS,
        std::env::consts::ARCH,
        logical_cpus(),
        num_cpus::get_physical()
    );
}
