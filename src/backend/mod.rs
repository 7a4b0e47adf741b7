pub mod cache;
pub mod prefetch;
pub mod prefs;
pub mod window;
pub mod xkcd;
