//! The two entry points the core exposes (§6): `run` (headless protocol loop)
//! and `build_ui` (delegates to the out-of-scope UI collaborator).

use std::path::PathBuf;

use log::{error, info, warn};

use crate::config::YamlSpecialPathCatalog;
use crate::dispatch::{Dispatcher, SessionError};
use crate::error::TransportError;
use crate::handlers::Collaborators;
use crate::pathspace::{NullFilePicker, StdDriveProvider};
use crate::transport::{CancelToken, UsbTransport};

pub struct ServerConfig {
    pub vid: u16,
    pub pid: u16,
    pub catalog_path: Option<PathBuf>,
}

/// Headless protocol loop (§6 `run`): scan, connect, dispatch, reconnect on
/// disconnect, and exit cleanly when `cancel` is raised. Blocking end to end —
/// callers should run this on its own thread (the binary runs it via
/// `tokio::task::spawn_blocking`).
pub fn run(cancel: CancelToken, config: ServerConfig) -> anyhow::Result<()> {
    let catalog_path = match config.catalog_path {
        Some(p) => p,
        None => YamlSpecialPathCatalog::default_path()?,
    };
    let catalog = YamlSpecialPathCatalog::load_or_default(catalog_path)?;
    let drives = StdDriveProvider;
    let picker = NullFilePicker;

    loop {
        if cancel.is_cancelled() {
            info!("cancellation requested, exiting before connect");
            return Ok(());
        }

        info!(
            "scanning for goldleaf device (vid={:#06x} pid={:#06x})",
            config.vid, config.pid
        );
        let mut transport = match UsbTransport::connect(config.vid, config.pid, cancel.clone()) {
            Ok(t) => t,
            Err(TransportError::Cancelled) => {
                info!("cancelled while scanning");
                return Ok(());
            }
            Err(e) => {
                // Only a USB context/enumeration failure reaches here (device-not-found
                // keeps polling inside `connect`); this is the "fatal transport failure"
                // exit path described in §6.
                error!("fatal transport initialization failure: {e}");
                return Err(e.into());
            }
        };

        info!(
            "connected: product={:?} serial={:?}",
            transport.product_string(),
            transport.serial_number_string()
        );

        let collab = Collaborators {
            drives: &drives,
            catalog: &catalog,
            picker: &picker,
        };
        let mut dispatcher = Dispatcher::new(collab);

        match dispatcher.run(&mut transport) {
            SessionError::Transport(TransportError::Cancelled) => {
                info!("cancelled, shutting down");
                return Ok(());
            }
            SessionError::Transport(e) => {
                warn!("transport lost ({e}), returning to scanning");
            }
            SessionError::ProtocolFatal(e) => {
                warn!("session ended ({e}), returning to scanning");
            }
        }
    }
}

/// System tray / UI entry point (§6 `build_ui`). The UI itself is an
/// out-of-scope collaborator (§1); this crate ships the headless agent only.
pub fn build_ui(_cancel: CancelToken) -> anyhow::Result<()> {
    anyhow::bail!(
        "build_ui delegates to an out-of-scope UI collaborator; this build only wires up `run`"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_exits_cleanly_when_already_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let dir = tempfile::tempdir().unwrap();
        let result = run(
            cancel,
            ServerConfig {
                vid: crate::transport::GOLDLEAF_VID,
                pid: crate::transport::GOLDLEAF_PID,
                catalog_path: Some(dir.path().join("catalog.yaml")),
            },
        );
        assert!(result.is_ok());
    }
}
