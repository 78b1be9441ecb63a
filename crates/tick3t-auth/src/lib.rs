pub mod session;
pub mod telegram;

pub use session::{SessionEvent, WalletSession};
pub use telegram::{
    LoginLink, TelegramAuthData, TelegramAuthProvider, TelegramError, TelegramLogin,
    TelegramLoginIssuer, TelegramUser,
};
