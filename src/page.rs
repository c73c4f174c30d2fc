//! The scan page: owns one session, routes on the first decoded payload

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::capture::CameraCapability;
use crate::decoder::QrDecoder;
use crate::error::ScanError;
use crate::session::CameraScanSession;
use crate::surface::SurfaceFactory;
use crate::NavigationConfig;

/// Extras handed over by whoever navigated to the page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationState {
    pub nombre_usuario: Option<String>,
}

/// A navigation target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Route {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// `path?k=v&...` with the query percent-encoded
    pub fn to_url(&self) -> String {
        let mut url = self.path.clone();
        for (i, (key, value)) in self.query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }
}

/// Host routing. Called at most once per successful scan.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Hands routes to the host over a channel
#[derive(Clone)]
pub struct ChannelNavigator {
    tx: flume::Sender<Route>,
}

impl ChannelNavigator {
    pub fn channel() -> (Self, flume::Receiver<Route>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, route: Route) {
        if let Err(e) = self.tx.send(route) {
            error!("Nobody is listening for route {}", e.into_inner().to_url());
        }
    }
}

/// Page that scans one QR code and routes to the configured destination
pub struct ScanPage<C, F, D, N>
where
    C: CameraCapability,
    F: SurfaceFactory,
    D: QrDecoder,
    N: Navigator + 'static,
{
    nombre_usuario: String,
    session: CameraScanSession<C, F, D>,
    navigator: Arc<N>,
    navigation: NavigationConfig,
    last_error: Option<ScanError>,
    destroyed: bool,
}

impl<C, F, D, N> ScanPage<C, F, D, N>
where
    C: CameraCapability,
    F: SurfaceFactory,
    D: QrDecoder,
    N: Navigator + 'static,
{
    pub fn new(
        state: Option<&NavigationState>,
        session: CameraScanSession<C, F, D>,
        navigator: Arc<N>,
        navigation: NavigationConfig,
    ) -> Self {
        let nombre_usuario = state
            .and_then(|s| s.nombre_usuario.clone())
            .unwrap_or_default();

        Self {
            nombre_usuario,
            session,
            navigator,
            navigation,
            last_error: None,
            destroyed: false,
        }
    }

    /// Display name passed in by the previous page, empty if none
    pub fn nombre_usuario(&self) -> &str {
        &self.nombre_usuario
    }

    /// Why the camera never started, for a UI that wants to show it
    pub fn last_error(&self) -> Option<&ScanError> {
        self.last_error.as_ref()
    }

    pub fn session(&self) -> &CameraScanSession<C, F, D> {
        &self.session
    }

    /// Open the camera and start scanning. Failures are logged and kept in
    /// [`Self::last_error`]; scanning then simply never activates.
    pub async fn on_init(&mut self)
    where
        F: 'static,
        D: 'static,
    {
        let navigator = self.navigator.clone();
        let destination = self.navigation.destination.clone();
        let query_param = self.navigation.query_param.clone();

        let started = self
            .session
            .start(move |data| {
                let route = Route::new(destination).with_query(query_param, data);
                info!("Navigating to {}", route.to_url());
                navigator.navigate(route);
            })
            .await;

        if let Err(e) = started {
            warn!("Scanner not started: {}", e);
            self.last_error = Some(e);
        }
    }

    /// Page teardown. Stops the camera, once.
    pub fn on_destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.session.stop();
    }
}

impl<C, F, D, N> Drop for ScanPage<C, F, D, N>
where
    C: CameraCapability,
    F: SurfaceFactory,
    D: QrDecoder,
    N: Navigator + 'static,
{
    fn drop(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.session.stop();
        }
    }
}
