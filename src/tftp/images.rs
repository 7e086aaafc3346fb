//! Boot images served over TFTP, keyed by firmware type.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use macaddr::MacAddr6;
use tracing::{debug, info, warn};

use crate::domain::{BootEvent, EventSource, Firmware, MachineState};
use crate::error::DispatchError;
use crate::reporter::EventReporter;
use crate::tftp::TransferHandler;

/// Boot images by firmware type. Built once at startup, read-only after.
#[derive(Debug, Clone, Default)]
pub struct ImageMap {
    images: HashMap<Firmware, Arc<[u8]>>,
}

impl ImageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, firmware: Firmware, image: impl Into<Arc<[u8]>>) -> Self {
        self.insert(firmware, image);
        self
    }

    pub fn insert(&mut self, firmware: Firmware, image: impl Into<Arc<[u8]>>) {
        self.images.insert(firmware, image.into());
    }

    /// Read every image file into memory.
    pub fn load(paths: &[(Firmware, PathBuf)]) -> Result<Self> {
        let mut map = Self::new();
        for (firmware, path) in paths {
            let image = fs::read(path)
                .with_context(|| format!("Failed to read {} image {}", firmware, path.display()))?;
            info!("Loaded {} image {} ({} bytes)", firmware, path.display(), image.len());
            map.insert(*firmware, image);
        }
        Ok(map)
    }

    pub fn get(&self, firmware: Firmware) -> Option<Arc<[u8]>> {
        self.images.get(&firmware).cloned()
    }

    /// Look up the image for a firmware type code.
    pub fn lookup(&self, code: u32) -> Result<Arc<[u8]>, DispatchError> {
        Firmware::from_code(code)
            .and_then(|firmware| self.get(firmware))
            .ok_or(DispatchError::UnknownFirmware(code))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Split a transfer path `<mac>/<firmware code>` into its parts.
pub fn parse_path(path: &str) -> Result<(MacAddr6, u32), DispatchError> {
    let not_found = || DispatchError::NotFound(path.to_string());

    let mut segments = path.split('/');
    let (mac, code) = match (segments.next(), segments.next(), segments.next()) {
        (Some(mac), Some(code), None) => (mac, code),
        _ => return Err(not_found()),
    };

    let mac = mac.parse::<MacAddr6>().map_err(|_| not_found())?;
    let code = code.parse::<u32>().map_err(|_| not_found())?;
    Ok((mac, code))
}

/// Serves images from an `ImageMap` to TFTP clients.
pub struct ImageDispatcher {
    images: Arc<ImageMap>,
    reporter: Arc<dyn EventReporter>,
}

impl ImageDispatcher {
    pub fn new(images: Arc<ImageMap>, reporter: Arc<dyn EventReporter>) -> Self {
        Self { images, reporter }
    }

    /// Resolve `path` to an image and its length.
    pub fn dispatch(&self, path: &str) -> Result<(Arc<[u8]>, u64), DispatchError> {
        let (_, code) = parse_path(path)?;
        let image = self.images.lookup(code)?;
        let len = image.len() as u64;
        Ok((image, len))
    }
}

impl TransferHandler for ImageDispatcher {
    fn open(&self, path: &str, _peer: SocketAddr) -> Result<(Box<dyn Read + Send>, u64)> {
        let (image, len) = self.dispatch(path)?;
        Ok((Box::new(Cursor::new(image)), len))
    }

    fn transfer_finished(&self, peer: SocketAddr, path: &str, outcome: &Result<u64>) {
        let event = match (outcome, parse_path(path)) {
            (Ok(bytes), Ok((mac, _))) => {
                debug!("Sent {:?} to {} ({} bytes)", path, peer, bytes);
                BootEvent::machine(
                    EventSource::Tftp,
                    mac,
                    MachineState::Tftp,
                    format!("Sent iPXE to {}", peer),
                )
            }
            (Ok(_), Err(e)) => {
                warn!("Unable to extract MAC from {:?}: {}", path, e);
                return;
            }
            (Err(e), _) => BootEvent::peer(
                EventSource::Tftp,
                peer,
                MachineState::TftpFailed,
                format!("Send of {:?} failed: {:#}", path, e),
            ),
        };
        self.reporter.report(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::testing::RecordingReporter;
    use anyhow::anyhow;

    fn peer() -> SocketAddr {
        "10.0.0.9:2070".parse().unwrap()
    }

    mod image_map_tests {
        use super::*;

        #[test]
        fn test_lookup_registered() {
            let map = ImageMap::new().with_image(Firmware::EfiArm64, b"arm".to_vec());
            assert_eq!(&*map.lookup(11).unwrap(), b"arm");
        }

        #[test]
        fn test_lookup_unregistered() {
            let map = ImageMap::new().with_image(Firmware::EfiArm64, b"arm".to_vec());
            assert_eq!(map.lookup(7), Err(DispatchError::UnknownFirmware(7)));
            assert_eq!(map.lookup(999), Err(DispatchError::UnknownFirmware(999)));
        }

        #[test]
        fn test_load_reads_files() {
            let dir = std::env::temp_dir().join(format!("proxyboot-images-{}", std::process::id()));
            fs::create_dir_all(&dir).unwrap();
            let path = dir.join("ipxe.efi");
            fs::write(&path, b"efi image").unwrap();

            let map = ImageMap::load(&[(Firmware::Efi64, path)]).unwrap();
            assert_eq!(map.len(), 1);
            assert_eq!(&*map.get(Firmware::Efi64).unwrap(), b"efi image");

            fs::remove_dir_all(&dir).unwrap();
        }

        #[test]
        fn test_load_missing_file_fails() {
            let result = ImageMap::load(&[(Firmware::X86Pc, PathBuf::from("/nonexistent/undionly.kpxe"))]);
            assert!(result.is_err());
        }
    }

    mod parse_path_tests {
        use super::*;

        #[test]
        fn test_valid_path() {
            let (mac, code) = parse_path("aa:bb:cc:dd:ee:ff/11").unwrap();
            assert_eq!(mac, MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff));
            assert_eq!(code, 11);
        }

        #[test]
        fn test_wrong_shape() {
            for path in ["not-a-path", "aa:bb:cc:dd:ee:ff/11/x", "", "/11"] {
                assert_eq!(
                    parse_path(path),
                    Err(DispatchError::NotFound(path.to_string())),
                    "path {:?}",
                    path
                );
            }
        }

        #[test]
        fn test_bad_segments() {
            assert!(parse_path("zz:bb:cc:dd:ee:ff/11").is_err());
            assert!(parse_path("aa:bb:cc:dd:ee:ff/eleven").is_err());
            assert!(parse_path("aa:bb:cc:dd:ee:ff/-1").is_err());
        }
    }

    mod dispatcher_tests {
        use super::*;

        fn dispatcher() -> (ImageDispatcher, Arc<RecordingReporter>) {
            let images = ImageMap::new()
                .with_image(Firmware::EfiArm64, b"arm64 ipxe".to_vec())
                .with_image(Firmware::X86Pc, b"undionly".to_vec());
            let reporter = Arc::new(RecordingReporter::default());
            (ImageDispatcher::new(Arc::new(images), reporter.clone()), reporter)
        }

        #[test]
        fn test_open_returns_image_and_length() {
            let (dispatcher, _) = dispatcher();
            let (mut reader, len) = dispatcher.open("aa:bb:cc:dd:ee:ff/11", peer()).unwrap();

            let mut data = Vec::new();
            reader.read_to_end(&mut data).unwrap();
            assert_eq!(data, b"arm64 ipxe");
            assert_eq!(len, 10);
        }

        #[test]
        fn test_unknown_path() {
            let (dispatcher, _) = dispatcher();
            assert_eq!(
                dispatcher.dispatch("not-a-path").unwrap_err(),
                DispatchError::NotFound("not-a-path".to_string())
            );
        }

        #[test]
        fn test_unknown_firmware() {
            let (dispatcher, _) = dispatcher();
            assert_eq!(
                dispatcher.dispatch("aa:bb:cc:dd:ee:ff/999").unwrap_err(),
                DispatchError::UnknownFirmware(999)
            );
            let err = dispatcher.open("aa:bb:cc:dd:ee:ff/999", peer()).err().unwrap();
            assert_eq!(err.to_string(), "unknown firmware type 999");
        }

        #[test]
        fn test_success_reports_machine() {
            let (dispatcher, reporter) = dispatcher();
            dispatcher.transfer_finished(peer(), "aa:bb:cc:dd:ee:ff/0", &Ok(8));

            let events = reporter.events();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].state, MachineState::Tftp);
            assert_eq!(events[0].message, "Sent iPXE to 10.0.0.9:2070");
            assert_eq!(
                events[0].mac(),
                Some(MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff))
            );
        }

        #[test]
        fn test_failure_reports_peer() {
            let (dispatcher, reporter) = dispatcher();
            dispatcher.transfer_finished(peer(), "not-a-path", &Err(anyhow!("client gave up")));

            let events = reporter.events();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].state, MachineState::TftpFailed);
            assert_eq!(events[0].mac(), None);
            assert_eq!(events[0].message, "Send of \"not-a-path\" failed: client gave up");
        }
    }
}
