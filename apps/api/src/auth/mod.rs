//! Email verification codes.

pub mod handlers;
pub mod otp;

pub use otp::{OtpError, OtpStore, RedisOtpStore};
