//! Client side of an intercept session.

use std::{error::Error as StdError, future::Future, io};

/// Result codes returned by the connector for intercept calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptCode {
    Ok,
    NoConnection,
    NoTrafficManager,
    TrafficManagerConnecting,
    TrafficManagerError,
    AlreadyExists,
    NoAcceptableDeployment,
    AmbiguousMatch,
    FailedToEstablish,
    NotFound,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterceptRequest {
    pub name: String,
    pub deployment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptResponse {
    pub code: InterceptCode,
    /// Namespace on success, otherwise detail for the code.
    pub text: String,
    pub preview_url: String,
}

/// The daemon-side service that manages intercepts.
pub trait Connector {
    type Error: StdError + Send + Sync + 'static;

    fn add_intercept(
        &self,
        request: &InterceptRequest,
    ) -> impl Future<Output = Result<InterceptResponse, Self::Error>> + Send;

    fn remove_intercept(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<InterceptResponse, Self::Error>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    #[error("the connector is not running")]
    ConnectorNotRunning,
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Connector(Box<dyn StdError + Send + Sync>),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Human readable explanation of a non-OK `code`.
pub fn intercept_message(code: InterceptCode, text: &str) -> String {
    match code {
        InterceptCode::Ok => String::new(),
        InterceptCode::NoConnection => "Local network is not connected to the cluster".to_owned(),
        InterceptCode::NoTrafficManager => "Intercept unavailable: no traffic manager".to_owned(),
        InterceptCode::TrafficManagerConnecting => {
            "Connecting to traffic manager...".to_owned()
        }
        InterceptCode::TrafficManagerError => format!("Traffic manager error: {text}"),
        InterceptCode::AlreadyExists => format!("Intercept with name {text:?} already exists"),
        InterceptCode::NoAcceptableDeployment => {
            format!("No interceptable deployment matching {text} found")
        }
        InterceptCode::AmbiguousMatch => {
            format!("Found more than one possible match: {text}")
        }
        InterceptCode::FailedToEstablish => format!("Failed to establish intercept: {text}"),
        InterceptCode::NotFound => format!("Intercept named {text:?} not found"),
    }
}

/// An intercept that can be established and torn down again.
pub struct InterceptState<C, W> {
    connector: C,
    request: InterceptRequest,
    out: W,
}

impl<C: Connector, W: io::Write> InterceptState<C, W> {
    pub fn new(connector: C, request: InterceptRequest, out: W) -> Self {
        Self {
            connector,
            request,
            out,
        }
    }

    /// Adds the intercept. `Ok(false)` means an intercept with this name already exists.
    pub async fn ensure_state(&mut self) -> Result<bool, InterceptError> {
        let response = self
            .connector
            .add_intercept(&self.request)
            .await
            .map_err(|err| InterceptError::Connector(Box::new(err)))?;

        match response.code {
            InterceptCode::Ok => {
                writeln!(
                    self.out,
                    "Using deployment {} in namespace {}",
                    self.request.deployment, response.text
                )?;
                if !response.preview_url.is_empty() {
                    writeln!(
                        self.out,
                        "Share a preview of your changes with anyone by visiting\n  {}",
                        response.preview_url
                    )?;
                }
                Ok(true)
            }
            InterceptCode::AlreadyExists => {
                writeln!(
                    self.out,
                    "{}",
                    intercept_message(response.code, &response.text)
                )?;
                Ok(false)
            }
            InterceptCode::NoConnection => Err(InterceptError::ConnectorNotRunning),
            code => Err(InterceptError::Rejected(intercept_message(
                code,
                &response.text,
            ))),
        }
    }

    pub async fn deactivate_state(&mut self) -> Result<(), InterceptError> {
        let name = self.request.name.trim();
        let response = self
            .connector
            .remove_intercept(name)
            .await
            .map_err(|err| InterceptError::Connector(Box::new(err)))?;
        match response.code {
            InterceptCode::Ok => Ok(()),
            code => Err(InterceptError::Rejected(intercept_message(
                code,
                &response.text,
            ))),
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct ScriptedConnector {
        responses: Mutex<Vec<Result<InterceptResponse, io::Error>>>,
        removed: Mutex<Vec<String>>,
    }

    impl ScriptedConnector {
        fn replying(code: InterceptCode, text: &str, preview_url: &str) -> Self {
            let connector = Self::default();
            connector.responses.lock().push(Ok(InterceptResponse {
                code,
                text: text.to_owned(),
                preview_url: preview_url.to_owned(),
            }));
            connector
        }

        fn next(&self) -> Result<InterceptResponse, io::Error> {
            self.responses.lock().remove(0)
        }
    }

    impl Connector for &ScriptedConnector {
        type Error = io::Error;

        async fn add_intercept(
            &self,
            _request: &InterceptRequest,
        ) -> Result<InterceptResponse, io::Error> {
            self.next()
        }

        async fn remove_intercept(&self, name: &str) -> Result<InterceptResponse, io::Error> {
            self.removed.lock().push(name.to_owned());
            self.next()
        }
    }

    fn request() -> InterceptRequest {
        InterceptRequest {
            name: " echo-intercept ".to_owned(),
            deployment: "echo".to_owned(),
        }
    }

    #[tokio::test]
    async fn established_intercept_is_reported() {
        let connector = ScriptedConnector::replying(
            InterceptCode::Ok,
            "default",
            "https://preview.example.com/abc",
        );
        let mut state = InterceptState::new(&connector, request(), Vec::new());

        assert!(state.ensure_state().await.unwrap());
        let out = String::from_utf8(state.into_output()).unwrap();
        assert_eq!(
            out,
            "Using deployment echo in namespace default\n\
             Share a preview of your changes with anyone by visiting\n  \
             https://preview.example.com/abc\n"
        );
    }

    #[tokio::test]
    async fn existing_intercept_is_not_an_error() {
        let connector =
            ScriptedConnector::replying(InterceptCode::AlreadyExists, "echo-intercept", "");
        let mut state = InterceptState::new(&connector, request(), Vec::new());

        assert!(!state.ensure_state().await.unwrap());
        let out = String::from_utf8(state.into_output()).unwrap();
        assert!(out.contains("already exists"));
    }

    #[tokio::test]
    async fn missing_connection_means_connector_down() {
        let connector = ScriptedConnector::replying(InterceptCode::NoConnection, "", "");
        let mut state = InterceptState::new(&connector, request(), Vec::new());

        let err = state.ensure_state().await.unwrap_err();
        assert!(matches!(err, InterceptError::ConnectorNotRunning));
    }

    #[tokio::test]
    async fn other_codes_are_rejections() {
        let connector =
            ScriptedConnector::replying(InterceptCode::NoAcceptableDeployment, "echo", "");
        let mut state = InterceptState::new(&connector, request(), Vec::new());

        let err = state.ensure_state().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "No interceptable deployment matching echo found"
        );
    }

    #[tokio::test]
    async fn deactivate_uses_trimmed_name() {
        let connector = ScriptedConnector::replying(InterceptCode::Ok, "", "");
        let mut state = InterceptState::new(&connector, request(), Vec::new());

        state.deactivate_state().await.unwrap();
        assert_eq!(*connector.removed.lock(), ["echo-intercept"]);
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let connector = ScriptedConnector::default();
        connector
            .responses
            .lock()
            .push(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));
        let mut state = InterceptState::new(&connector, request(), Vec::new());

        let err = state.ensure_state().await.unwrap_err();
        assert!(matches!(err, InterceptError::Connector(_)));
    }
}
