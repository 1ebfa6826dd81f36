// ── Event subscriptions ──
//
// `Subscriber` connects to a pad (re-authenticating at most once when the
// token is rejected) and turns the connection's event lane into a
// `Subscription` stream. Cancellation closes the connection.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use lightpad_api::{
    Connection, ConnectionLost, DeviceConnector, DeviceEndpoint, LightpadEvent, Session,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SubscriptionError;
use crate::session::SessionProvider;

/// Connects to pads and opens subscriptions.
pub struct Subscriber<C, P> {
    connector: C,
    sessions: P,
}

impl<C, P> Subscriber<C, P>
where
    C: DeviceConnector,
    P: SessionProvider,
{
    pub fn new(connector: C, sessions: P) -> Self {
        Self {
            connector,
            sessions,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn sessions(&self) -> &P {
        &self.sessions
    }

    /// Connect with `session`. If the pad rejects the token, refresh the
    /// session once and reconnect once; a second failure is returned.
    pub async fn connect(
        &self,
        endpoint: &DeviceEndpoint,
        session: Arc<Session>,
    ) -> Result<Connection, SubscriptionError> {
        match self.connector.connect(endpoint, &session).await {
            Ok(conn) => Ok(conn),
            Err(e) if e.is_auth_rejected() => {
                info!(%endpoint, error = %e, "house access token rejected, re-authenticating");
                let fresh = self.sessions.refresh(&session).await?;
                let conn = self.connector.connect(endpoint, &fresh).await.map_err(|e| {
                    warn!(%endpoint, error = %e, "reconnect after re-authentication failed");
                    e
                })?;
                Ok(conn)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Connect and stream the pad's events until `cancel` fires, the
    /// subscription is dropped, or the connection is lost.
    pub async fn subscribe(
        &self,
        endpoint: &DeviceEndpoint,
        session: Arc<Session>,
        cancel: CancellationToken,
    ) -> Result<Subscription, SubscriptionError> {
        let conn = Arc::new(self.connect(endpoint, session).await?);
        Subscription::attach(conn, &cancel)
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Ordered events of one connection.
///
/// Yields every event in arrival order. A lost connection yields one
/// [`SubscriptionError::ConnectionLost`] and then ends. After
/// cancellation nothing further is yielded.
pub struct Subscription {
    connection: Arc<Connection>,
    events: UnboundedReceiverStream<Result<LightpadEvent, ConnectionLost>>,
    cancel: CancellationToken,
    done: bool,
}

impl Subscription {
    /// Subscribe to an already established connection. Fails with
    /// [`SubscriptionError::AlreadySubscribed`] if its event lane was taken.
    pub fn attach(
        connection: Arc<Connection>,
        cancel: &CancellationToken,
    ) -> Result<Self, SubscriptionError> {
        let lane = connection
            .take_events()
            .ok_or(SubscriptionError::AlreadySubscribed)?;

        // Child token: dropping the subscription must not cancel the caller's token.
        let cancel = cancel.child_token();
        let watched = Arc::clone(&connection);
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => watched.close(),
                () = watched.closed() => {}
            }
        });

        debug!(endpoint = %connection.endpoint(), "subscription started");
        Ok(Self {
            connection,
            events: UnboundedReceiverStream::new(lane),
            cancel,
            done: false,
        })
    }

    /// The connection events arrive on. Commands may be sent on it while
    /// the subscription runs.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// End the subscription and close its connection.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn finish(&mut self) {
        self.done = true;
        self.connection.close();
    }
}

impl Stream for Subscription {
    type Item = Result<LightpadEvent, SubscriptionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if this.cancel.is_cancelled() {
            this.finish();
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.events).poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(Some(Err(lost))) => {
                this.finish();
                Poll::Ready(Some(Err(lost.into())))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
