//! Web publish contract. The HTTP transport lives outside the core; it pulls
//! the latest [`PublishedView`] from a [`WebPublisher`].

use std::net::TcpListener;
use std::sync::Arc;

use ndarray::Array2;

use super::SessionStatus;
use crate::consts::{
    MAX_WEB_PORT, MIN_WEB_PORT, STANDBY_IMAGE_HEIGHT, STANDBY_IMAGE_LEVEL, STANDBY_IMAGE_WIDTH,
};
use crate::error::{LiveStackError, Result};
use crate::frame::Image;

/// Current renderable image with the status it was produced under.
#[derive(Clone, Debug)]
pub struct PublishedView {
    pub image: Arc<Image>,
    pub status: SessionStatus,
}

/// Flat dark placeholder published until the first stack result exists.
pub fn standby_image() -> Image {
    Image::mono(
        Array2::from_elem((STANDBY_IMAGE_HEIGHT, STANDBY_IMAGE_WIDTH), STANDBY_IMAGE_LEVEL),
        8,
        "standby",
    )
}

pub trait WebPublisher: Send {
    /// Start serving on `port` and return the reachable address.
    fn start(&mut self, port: u16) -> Result<String>;

    fn stop(&mut self);

    fn address(&self) -> Option<String>;

    fn is_running(&self) -> bool {
        self.address().is_some()
    }

    /// Replace the view served to clients.
    fn publish(&mut self, view: PublishedView);
}

/// Reserves the port and keeps the latest view for an external transport.
#[derive(Debug, Default)]
pub struct FolderPublisher {
    listener: Option<TcpListener>,
    address: Option<String>,
    latest: Option<PublishedView>,
}

impl FolderPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<&PublishedView> {
        self.latest.as_ref()
    }
}

impl WebPublisher for FolderPublisher {
    fn start(&mut self, port: u16) -> Result<String> {
        if let Some(address) = &self.address {
            return Ok(address.clone());
        }
        if port < MIN_WEB_PORT {
            return Err(LiveStackError::WebServer(format!(
                "port must lie between {MIN_WEB_PORT} and {MAX_WEB_PORT}, got {port}"
            )));
        }
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| LiveStackError::WebServer(format!("cannot bind port {port}: {e}")))?;
        let address = format!("http://localhost:{port}");
        self.listener = Some(listener);
        self.address = Some(address.clone());
        Ok(address)
    }

    fn stop(&mut self) {
        self.listener = None;
        self.address = None;
    }

    fn address(&self) -> Option<String> {
        self.address.clone()
    }

    fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    fn publish(&mut self, view: PublishedView) {
        self.latest = Some(view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privileged_ports_are_refused() {
        let mut publisher = FolderPublisher::new();
        assert!(publisher.start(80).is_err());
        assert!(!publisher.is_running());
    }

    #[test]
    fn standby_image_is_a_flat_mono_frame() {
        let image = standby_image();
        assert!(!image.is_color());
        assert_eq!(
            (image.width(), image.height()),
            (STANDBY_IMAGE_WIDTH, STANDBY_IMAGE_HEIGHT)
        );
    }

    #[test]
    fn busy_port_is_reported() {
        let taken = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let mut publisher = FolderPublisher::new();
        assert!(publisher.start(port).is_err());
        assert_eq!(publisher.address(), None);
    }
}
