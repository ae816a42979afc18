pub mod config;
pub mod protocol;
pub mod stdio;
pub mod supabase;
pub mod sync;
pub mod tools;
