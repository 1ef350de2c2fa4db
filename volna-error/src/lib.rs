//! Централизованная обработка ошибок брокера volna.
//!
//! - `ext`: трейт [`ErrorExt`]: статус-код, безопасное сообщение, теги.
//! - `stack`: [`StackError`] с цепочкой контекстов.
//! - `status_code`: числовой каталог [`StatusCode`].
//! - `macros`: `bail!` и [`ResultExt`].
//! - `types`: доменные ошибки (пути, публикация, коннекторы, кластер).

pub mod ext;
pub mod macros;
pub mod stack;
pub mod status_code;
pub mod types;

// Publicly re-export all error types and functions from the submodules to
// simplify access from external code.
pub use ext::*;
pub use macros::*;
pub use stack::*;
pub use status_code::*;
pub use types::*;

pub type VolnaResult<T> = Result<T, StackError>;
