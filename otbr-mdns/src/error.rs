// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Publisher error taxonomy
//!
//! Every backend-specific failure is translated into one of these variants at
//! the adapter boundary; the publisher only ever branches on them. Success is
//! `Ok(())`.

/// Errors reported by the publisher and its backends
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The requested name or record does not exist
    #[error("Not found")]
    NotFound,

    /// Arguments were rejected before reaching the backend
    #[error("Invalid arguments")]
    InvalidArgs,

    /// The name is already claimed by someone else on the network
    #[error("Duplicated name")]
    Duplicated,

    /// The backend does not support the operation
    #[error("Not implemented")]
    NotImplemented,

    /// The publisher is not ready
    #[error("Invalid state")]
    InvalidState,

    /// A registration or subscription was torn down before it completed
    #[error("Aborted")]
    Aborted,

    /// Malformed wire data or DNS name
    #[error("Parse error")]
    Parse,

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result alias used throughout the publisher
pub type Result<T> = core::result::Result<T, Error>;
