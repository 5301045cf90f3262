//! # counsel-client
//!
//! Headless client for the consultation relay. Logs in as the identity
//! given in `COUNSEL_IDENTITY` (`user:<id>` or `lawyer:<id>`), optionally
//! opens the room in `COUNSEL_ROOM` and joins the call of `COUNSEL_BOOKING`,
//! and logs notifications, room updates and connection changes until Ctrl+C.
//!
//! Calls capture the default microphone when built with the `microphone`
//! feature, and send no media otherwise.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use counsel_client::{CallSession, ClientConfig, HttpBackend, RoomSession, RoomUpdate, Session};
use counsel_media::{CallUpdate, MediaDevices};
use counsel_net::WsConnector;
use counsel_shared::constants::APP_NAME;
use counsel_shared::types::Identity;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("counsel_client=debug,counsel_net=debug,counsel_media=info,warn")
    });
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting {APP_NAME} client v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let raw = std::env::var("COUNSEL_IDENTITY").context("COUNSEL_IDENTITY is not set")?;
    let identity = Identity::parse(&raw).map_err(anyhow::Error::msg)?;

    let backend = Arc::new(HttpBackend::new(&config.api_url)?);
    let connector = WsConnector::new(config.socket_url.clone());
    let mut session = Session::login(config, identity, connector, backend).await?;

    let mut room = match std::env::var("COUNSEL_ROOM") {
        Ok(room_id) => {
            let mut room = session.open_room(room_id.into()).await?;
            // A terminal client is always looking at its room.
            room.set_visibility(true);
            room.set_focus(true);
            Some(room)
        }
        Err(_) => None,
    };

    let mut call = match std::env::var("COUNSEL_BOOKING") {
        Ok(booking_id) => Some(session.open_call(booking_id.into(), &devices()).await?),
        Err(_) => None,
    };

    let mut connection = session.transport().connection_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    warn!("Transport stopped");
                    break;
                }
                let connected = *connection.borrow_and_update();
                info!(connected, "Connection state changed");
            }
            update = next_room_update(&mut room) => match update {
                Some(update) => log_room_update(room.as_ref(), update),
                None => {
                    warn!("Room channel closed");
                    room = None;
                }
            },
            update = next_call_update(&mut call) => match update {
                Some(CallUpdate::Ended { by_remote }) => {
                    info!(by_remote, "Call ended");
                    call = None;
                }
                Some(update) => info!(?update, "Call update"),
                None => call = None,
            },
            notification = session.notifications_mut().next_update() => match notification {
                Some(n) => info!(
                    id = %n.id,
                    unread = session.notifications().unread_count(),
                    "{}", n.message
                ),
                None => {
                    warn!("Notification channel closed");
                    break;
                }
            },
        }
    }

    if let Some(call) = call {
        if let Err(e) = call.end().await {
            warn!(error = %e, "Could not hang up");
        }
    }
    drop(room);
    session.logout().await;
    info!("Bye");
    Ok(())
}

#[cfg(feature = "microphone")]
fn devices() -> impl MediaDevices {
    counsel_media::MicrophoneDevices
}

#[cfg(not(feature = "microphone"))]
fn devices() -> impl MediaDevices {
    counsel_media::HeadlessDevices::default()
}

async fn next_call_update(call: &mut Option<CallSession>) -> Option<CallUpdate> {
    match call {
        Some(call) => call.next_update().await,
        None => std::future::pending().await,
    }
}

async fn next_room_update(room: &mut Option<RoomSession>) -> Option<RoomUpdate> {
    match room {
        Some(room) => room.next_update().await,
        None => std::future::pending().await,
    }
}

fn log_room_update(room: Option<&RoomSession>, update: RoomUpdate) {
    let Some(room) = room else {
        return;
    };
    match update {
        RoomUpdate::Received(id) | RoomUpdate::Confirmed { id, .. } => {
            if let Some(message) = room.messages().iter().find(|m| m.id == id) {
                info!(
                    room = %room.room_id(),
                    from = %message.sender_id,
                    kind = ?room.message_kind(message),
                    "{}", message.content
                );
            }
        }
        RoomUpdate::Read { count } => info!(room = %room.room_id(), count, "Messages read"),
        RoomUpdate::MarkedRead { count } => {
            info!(room = %room.room_id(), count, "Marked messages read")
        }
        RoomUpdate::SendFailed(e) => warn!(room = %room.room_id(), error = %e, "Send failed"),
    }
}
