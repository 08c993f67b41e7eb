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

//! DNS-SD native error codes
//!
//! Backends whose engine speaks the DNS-SD API report failures with these
//! codes; [`dns_error_to_error`] is their translation table.

use crate::Error;

/// Unclassified failure
pub const UNKNOWN: i32 = -65537;
/// Name does not exist
pub const NO_SUCH_NAME: i32 = -65538;
/// Out of memory
pub const NO_MEMORY: i32 = -65539;
/// Bad parameter
pub const BAD_PARAM: i32 = -65540;
/// Engine in the wrong state
pub const BAD_STATE: i32 = -65542;
/// Bad flags
pub const BAD_FLAGS: i32 = -65543;
/// Operation not supported
pub const UNSUPPORTED: i32 = -65544;
/// Engine not initialized
pub const NOT_INITIALIZED: i32 = -65545;
/// Record already registered
pub const ALREADY_REGISTERED: i32 = -65547;
/// Name claimed by another responder
pub const NAME_CONFLICT: i32 = -65548;
/// Invalid request
pub const INVALID: i32 = -65549;
/// Unknown interface
pub const BAD_INTERFACE_INDEX: i32 = -65552;
/// Record does not exist
pub const NO_SUCH_RECORD: i32 = -65554;
/// Key does not exist
pub const NO_SUCH_KEY: i32 = -65556;
/// Query timed out
pub const TIMEOUT: i32 = -65568;

/// Map a native code onto the publisher's error taxonomy
pub fn dns_error_to_error(code: i32) -> Error {
    match code {
        NO_SUCH_NAME | NO_SUCH_RECORD | NO_SUCH_KEY => Error::NotFound,
        BAD_PARAM | BAD_FLAGS | BAD_INTERFACE_INDEX | INVALID => Error::InvalidArgs,
        NAME_CONFLICT | ALREADY_REGISTERED => Error::Duplicated,
        UNSUPPORTED => Error::NotImplemented,
        BAD_STATE | NOT_INITIALIZED => Error::InvalidState,
        other => Error::Backend(format!("DNS-SD error {other}")),
    }
}
