//! Синхронизация узлов кластера.
//!
//! - `frame`: кадры протокола узлов и кодек.
//! - `peer`: состояние связи с узлом, рукопожатие, обслуживание связи.
//! - `synchronizer`: слушатель, исходящие связи и рассылка сообщений.

pub mod frame;
pub mod peer;
pub mod synchronizer;

pub use frame::{Frame, PeerCodec, MAX_FRAME_SIZE, PROTOCOL_VERSION};
pub use peer::PeerState;
pub use synchronizer::*;
