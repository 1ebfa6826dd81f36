// ── Client facade ──
//
// Wires the house service, session provider and device transport from a
// `ClientConfig`. Consumers that do not need custom seams use this.

use lightpad_api::{
    Command, CommandReply, Connection, DeviceEndpoint, DeviceTransport, HouseClient, LoadMetrics,
    dispatch,
};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::session::{CloudSessions, SessionProvider};
use crate::subscription::{Subscriber, Subscription};

pub struct LightpadClient {
    subscriber: Subscriber<DeviceTransport, CloudSessions>,
}

impl LightpadClient {
    pub fn new(config: &ClientConfig) -> Result<Self, CoreError> {
        let cloud_url = config.cloud_url().map_err(|e| CoreError::Config {
            message: format!("Invalid cloud URL: {e}"),
        })?;

        let mut house = HouseClient::new(cloud_url, config.http_timeout)?
            .with_session_ttl(config.session_ttl);
        if let Some(hid) = &config.house_id {
            house = house.for_house(hid.clone());
        }

        let transport = DeviceTransport::new(config.transport())?;
        let sessions = CloudSessions::new(house, config.credentials.clone());

        Ok(Self {
            subscriber: Subscriber::new(transport, sessions),
        })
    }

    pub fn sessions(&self) -> &CloudSessions {
        self.subscriber.sessions()
    }

    /// Open an authenticated connection to `endpoint`.
    pub async fn connect(&self, endpoint: &DeviceEndpoint) -> Result<Connection, CoreError> {
        let session = self.sessions().current().await?;
        Ok(self.subscriber.connect(endpoint, session).await?)
    }

    /// Stream `endpoint`'s events until `cancel` fires.
    pub async fn subscribe(
        &self,
        endpoint: &DeviceEndpoint,
        cancel: CancellationToken,
    ) -> Result<Subscription, CoreError> {
        let session = self.sessions().current().await?;
        Ok(self.subscriber.subscribe(endpoint, session, cancel).await?)
    }

    /// Connect, run one command and close.
    pub async fn execute(
        &self,
        endpoint: &DeviceEndpoint,
        command: &Command,
    ) -> Result<CommandReply, CoreError> {
        // Fail before connecting when the arguments are bad.
        command.validate()?;
        let conn = self.connect(endpoint).await?;
        let reply = dispatch::send(&conn, command).await;
        conn.close();
        Ok(reply?)
    }

    pub async fn set_level(&self, endpoint: &DeviceEndpoint, level: i32) -> Result<(), CoreError> {
        self.execute(endpoint, &Command::SetLevel { level }).await?;
        Ok(())
    }

    pub async fn load_metrics(&self, endpoint: &DeviceEndpoint) -> Result<LoadMetrics, CoreError> {
        let conn = self.connect(endpoint).await?;
        let metrics = dispatch::load_metrics(&conn).await;
        conn.close();
        Ok(metrics?)
    }
}
