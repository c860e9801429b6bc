//! Value types shared between the core and the coordinator transport.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Base of the 64-bit id space for individual accounts in the public
/// universe (desktop instance).
const INDIVIDUAL_ID_BASE: u64 = 0x0110_0001 << 32;

/// Native 64-bit identity used by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SteamId(pub u64);

impl SteamId {
    /// Convert a short-form account id into the native id.
    pub fn from_account_id(account_id: AccountId) -> Self {
        Self(INDIVIDUAL_ID_BASE | u64::from(account_id.0))
    }

    /// Low 32 bits: the short-form account id.
    pub fn account_id(&self) -> AccountId {
        AccountId(self.0 as u32)
    }
}

impl fmt::Display for SteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short-form ("steam32") player id, as users type it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(AccountId)
    }
}

/// One edge server the transport may connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

/// Login material handed to the transport.
#[derive(Clone, PartialEq, Eq)]
pub struct LogOnDetails {
    pub account_name: String,
    pub password: String,
    /// Device fingerprint from an earlier machine-auth challenge.
    pub sha_sentryfile: Option<Vec<u8>>,
}

impl fmt::Debug for LogOnDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOnDetails")
            .field("account_name", &self.account_name)
            .field("password", &"<redacted>")
            .field("sha_sentryfile", &self.sha_sentryfile.as_ref().map(|s| s.len()))
            .finish()
    }
}

/// A player slot in a broadcast match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastPlayer {
    pub account_id: u32,
    pub hero_id: u32,
}

/// A live match as it appears on a broadcast-list page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastGame {
    pub match_id: u64,
    pub lobby_id: u64,
    pub players: Vec<BroadcastPlayer>,
    pub server_steam_id: u64,
    pub game_mode: u32,
    pub lobby_type: u32,
    pub spectators: u32,
    pub average_mmr: u32,
}

/// One page of the broadcast list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BroadcastPage {
    /// Offset this page was requested for, echoed back by the coordinator.
    pub start_game: u32,
    /// Non-zero when the page is restricted to a league.
    pub league_id: u32,
    pub specific_games: bool,
    pub game_list: Vec<BroadcastGame>,
}

/// Answer to a "spectate friend game" request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpectateReply {
    pub server_steamid: Option<u64>,
}

/// Coarse grouping of result codes, used when logging failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    InvalidCredentials,
    SteamGuard,
    RateLimited,
    ServiceUnavailable,
    LoggedOff,
    Other,
}

/// Result code reported by the transport for login and logoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EResult(pub i32);

impl EResult {
    pub const OK: EResult = EResult(1);
    pub const FAIL: EResult = EResult(2);
    pub const NO_CONNECTION: EResult = EResult(3);
    pub const INVALID_PASSWORD: EResult = EResult(5);
    pub const LOGGED_IN_ELSEWHERE: EResult = EResult(6);
    pub const SERVICE_UNAVAILABLE: EResult = EResult(20);
    pub const ACCOUNT_LOGON_DENIED: EResult = EResult(63);
    pub const RATE_LIMIT_EXCEEDED: EResult = EResult(84);

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }

    /// Symbolic name for the well-known codes.
    pub fn name(&self) -> &'static str {
        match self.0 {
            1 => "OK",
            2 => "Fail",
            3 => "NoConnection",
            5 => "InvalidPassword",
            6 => "LoggedInElsewhere",
            7 => "InvalidProtocolVer",
            8 => "InvalidParam",
            10 => "Busy",
            11 => "InvalidState",
            15 => "AccessDenied",
            16 => "Timeout",
            17 => "Banned",
            18 => "AccountNotFound",
            20 => "ServiceUnavailable",
            21 => "NotLoggedOn",
            25 => "LimitExceeded",
            34 => "LogonSessionReplaced",
            35 => "ConnectFailed",
            36 => "HandshakeFailed",
            37 => "IOFailure",
            38 => "RemoteDisconnect",
            48 => "TryAnotherCM",
            63 => "AccountLogonDenied",
            65 => "InvalidLoginAuthCode",
            66 => "AccountLogonDeniedNoMail",
            84 => "RateLimitExceeded",
            85 => "AccountLoginDeniedNeedTwoFactor",
            87 => "AccountLoginDeniedThrottle",
            88 => "TwoFactorCodeMismatch",
            _ => "Unknown",
        }
    }

    pub fn classify(&self) -> FailureClass {
        match self.0 {
            5 | 18 | 17 => FailureClass::InvalidCredentials,
            63 | 65 | 66 | 85 | 88 => FailureClass::SteamGuard,
            25 | 84 | 87 => FailureClass::RateLimited,
            3 | 10 | 16 | 20 | 35 | 36 | 37 | 48 => FailureClass::ServiceUnavailable,
            6 | 34 | 38 => FailureClass::LoggedOff,
            _ => FailureClass::Other,
        }
    }
}

impl fmt::Display for EResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_round_trips_through_steam_id() {
        let id = SteamId::from_account_id(AccountId(127_565_532));
        assert_eq!(id.0, 76_561_197_960_265_728 + 127_565_532);
        assert_eq!(id.account_id(), AccountId(127_565_532));
    }

    #[test]
    fn account_id_parses_decimal() {
        assert_eq!(" 42 ".parse::<AccountId>().unwrap(), AccountId(42));
        assert!("abc".parse::<AccountId>().is_err());
        assert!("-1".parse::<AccountId>().is_err());
    }

    #[test]
    fn log_on_details_debug_hides_password() {
        let details = LogOnDetails {
            account_name: "bot".into(),
            password: "hunter2".into(),
            sha_sentryfile: Some(vec![0; 20]),
        };
        let debug = format!("{details:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("bot"));
    }

    #[test]
    fn eresult_names_and_classes() {
        assert!(EResult::OK.is_ok());
        assert_eq!(EResult::INVALID_PASSWORD.name(), "InvalidPassword");
        assert_eq!(EResult::INVALID_PASSWORD.classify(), FailureClass::InvalidCredentials);
        assert_eq!(EResult::ACCOUNT_LOGON_DENIED.classify(), FailureClass::SteamGuard);
        assert_eq!(EResult::RATE_LIMIT_EXCEEDED.classify(), FailureClass::RateLimited);
        assert_eq!(EResult(9999).name(), "Unknown");
        assert_eq!(EResult(9999).classify(), FailureClass::Other);
        assert_eq!(EResult::FAIL.to_string(), "Fail (2)");
    }

    #[test]
    fn server_endpoints_serialize_as_plain_objects() {
        let servers = vec![ServerEndpoint { host: "162.254.193.6".into(), port: 27017 }];
        let json = serde_json::to_string(&servers).unwrap();
        assert_eq!(json, r#"[{"host":"162.254.193.6","port":27017}]"#);
    }
}
