use std::{fs, io, path::Path};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROM_HANDLE: OnceCell<Option<PrometheusHandle>> = OnceCell::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init() {
    PROM_HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "failed to install Prometheus metrics recorder");
            None
        }
    });
}

/// Write the current metrics in the text exposition format to `path`
/// (node-exporter textfile collector layout). Does nothing before `init`.
pub fn write_snapshot(path: &Path) -> io::Result<()> {
    let Some(handle) = PROM_HANDLE.get().and_then(Option::as_ref) else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // The collector may read at any moment; never expose a half-written file.
    let tmp = path.with_extension("prom.tmp");
    fs::write(&tmp, handle.render())?;
    fs::rename(&tmp, path)?;

    tracing::debug!(path = %path.display(), "metrics snapshot written");
    Ok(())
}
