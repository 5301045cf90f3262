/// Application name
pub const APP_NAME: &str = "Counsel";

/// Prefix of locally generated (optimistic) message ids
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Number of characters kept in a room's last-message preview
pub const PREVIEW_LEN: usize = 60;

/// Reconnection attempts before the transport gives up
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Fixed delay between reconnection attempts in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

/// Capacity of the transport command channel
pub const DEFAULT_COMMAND_BUFFER: usize = 256;

/// How long a send listens for a `chat-error` before the listener is dropped
pub const DEFAULT_SEND_ERROR_WINDOW_MS: u64 = 5_000;

/// Delay between observing the peer join and creating the SDP offer
pub const DEFAULT_CALL_OFFER_DELAY_MS: u64 = 1_000;

/// Public STUN server used when none is configured. No TURN relay is set up.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Media CDN hosts whose URLs may be rendered inline as images
pub const DEFAULT_MEDIA_HOSTS: &[&str] = &["res.cloudinary.com"];

/// Raster image extensions recognised by the URL heuristic
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "avif"];
