/// Number of messages fetched per history page
pub const PAGE_SIZE: usize = 50;

/// Username length bounds (inclusive)
pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 20;

/// Minimum password length accepted at registration
pub const PASSWORD_MIN_LEN: usize = 6;

/// User-facing error for a registration with a taken handle
pub const USERNAME_TAKEN: &str = "Username is already taken";

/// Avatar generator used for new profiles (seeded by username)
pub const DEFAULT_AVATAR_BASE_URL: &str = "https://api.dicebear.com/7.x/avatars/svg";

/// Status message given to freshly registered profiles
pub const DEFAULT_STATUS_MESSAGE: &str = "Hey there! I am using Parley";

/// Realtime channel name prefix for a chat's message stream
pub const CHAT_CHANNEL_PREFIX: &str = "chat:";
