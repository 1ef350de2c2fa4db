use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок брокера.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных (пути, шаблоны, сообщения)
/// - 4xxx: Обратное давление и лимиты
/// - 6xxx: Сеть / IO / приёмники
/// - 7xxx: Кластер
/// - 8xxx: Протокол межузлового обмена
/// - 9xxx: Коннекторы push-провайдеров
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,
    ShuttingDown = 1005,

    // === 2xxx: Ошибки данных ===
    NotFound = 2000,
    AlreadyExists = 2001,
    InvalidPath = 2002,
    MalformedPattern = 2003,
    InvalidMessage = 2004,

    // === 4xxx: Обратное давление ===
    RateLimited = 4000,
    QueueFull = 4001,

    // === 6xxx: Сеть/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ConnectionFailed = 6003,
    UnexpectedEof = 6004,
    SinkClosed = 6005,

    // === 7xxx: Кластер ===
    ClusterDown = 7000,
    PeerUnreachable = 7001,
    HandshakeFailed = 7002,
    SelfConnection = 7003,

    // === 8xxx: Протокол ===
    InvalidFrame = 8000,
    UnsupportedVersion = 8001,
    InvalidUtf8 = 8002,
    SizeLimit = 8003,
    DecodingError = 8004,

    // === 9xxx: Коннекторы ===
    TransientFailure = 9000,
    PermanentFailure = 9001,
    RetriesExhausted = 9002,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет конвертацию через `TryFrom<u32>`.
    #[test]
    fn test_from_u32() {
        let n = StatusCode::SelfConnection.code();
        assert_eq!(StatusCode::from_u32(n), Some(StatusCode::SelfConnection));
        assert!(StatusCode::from_u32(12345).is_none());
        let raw: u32 = StatusCode::QueueFull.into();
        assert_eq!(raw, 4001);
    }
}
