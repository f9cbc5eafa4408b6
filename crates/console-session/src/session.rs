//! Session lifecycle
//!
//! `ConsoleSession` is built once per process. A watcher task follows the
//! credential store's access token: a token appearing (login, restored
//! session, renewal) connects the notification stream with it, the token
//! being cleared (logout, failed renewal) disconnects it.

use std::sync::Arc;

use common::Secret;
use console_api::{ApiRequest, Navigator, RequestPipeline};
use console_auth::{
    BlobStore, CredentialStore, Identity, LOGIN_PATH, LoginRequest, LoginResponse, ME_PATH,
};
use console_notify::{NotificationClient, NotificationSink};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;

pub struct ConsoleSession {
    credentials: Arc<CredentialStore>,
    pipeline: RequestPipeline,
    notifications: NotificationClient,
    watcher: JoinHandle<()>,
}

impl ConsoleSession {
    /// Restore persisted credentials from `backing` and start following them.
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &Config,
        backing: Arc<dyn BlobStore>,
        navigator: Arc<dyn Navigator>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        config.validate()?;

        let credentials = Arc::new(CredentialStore::load(backing));
        let pipeline = RequestPipeline::new(config.api.clone(), credentials.clone(), navigator)?;
        let notifications = NotificationClient::new(config.stream_config()?, sink)?;
        let watcher = tokio::spawn(follow_credential(
            credentials.subscribe(),
            notifications.clone(),
        ));

        info!(
            authenticated = credentials.is_authenticated(),
            "console session started"
        );
        Ok(Self {
            credentials,
            pipeline,
            notifications,
            watcher,
        })
    }

    /// Sign in and store the issued credential and identity.
    pub async fn login(&self, username: &str, password: &str) -> Result<Identity> {
        let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest { username, password })?;
        let response: LoginResponse = self.pipeline.execute(&request).await?;

        self.credentials.set_identity(response.user.clone());
        self.credentials
            .set_credential(response.token, response.refresh_token);
        info!(user = %response.user.username, "signed in");
        Ok(response.user)
    }

    /// Reload the identity snapshot of the signed-in principal.
    pub async fn refresh_identity(&self) -> Result<Identity> {
        let identity: Identity = self.pipeline.execute(&ApiRequest::get(ME_PATH)).await?;
        self.credentials.set_identity(identity.clone());
        debug!(user = %identity.username, "identity refreshed");
        Ok(identity)
    }

    /// Clear the credential and close the stream. The stream is closed here
    /// rather than by the watcher, which may observe a quick re-login as a
    /// single token change.
    pub fn logout(&self) {
        self.credentials.clear();
        self.notifications.disconnect();
        info!("signed out");
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn notifications(&self) -> &NotificationClient {
        &self.notifications
    }

    /// Stop following the credential and close the stream. Persisted
    /// credentials are kept for the next start. Dropping the session has the
    /// same effect.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for ConsoleSession {
    fn drop(&mut self) {
        self.watcher.abort();
        self.notifications.disconnect();
        info!("console session stopped");
    }
}

async fn follow_credential(
    mut access: watch::Receiver<Option<Secret<String>>>,
    notifications: NotificationClient,
) {
    loop {
        let current = access.borrow_and_update().clone();
        match current {
            Some(token) => notifications.connect(token.expose()),
            None => notifications.disconnect(),
        }
        if access.changed().await.is_err() {
            break;
        }
    }
}
