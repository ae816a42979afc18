pub mod discord_connection;

pub use discord_connection::{DiscordConnection, DiscordConnectionFactory, DEFAULT_API_BASE};
