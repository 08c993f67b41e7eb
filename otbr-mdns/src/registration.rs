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

//! Registration lifecycle
//!
//! A registration is `Pending` until its first `complete`, after which it is
//! terminal. Callers that publish the same thing while it is pending are
//! queued on it and all of them are answered by that one completion. Dropping
//! a pending registration answers everyone with [`Error::Aborted`].

use crate::backend::{NativeHandle, RequestId};
use crate::types::{HostRegistrationInfo, ServiceRegistrationInfo};
use crate::{Error, Result};

/// One-shot completion callback for publish/unpublish
pub type ResultCallback = Box<dyn FnOnce(Result<()>)>;

pub(crate) struct Registration<T> {
    info: T,
    request_id: RequestId,
    callbacks: Vec<ResultCallback>,
    completed: bool,
    native: Option<Box<dyn NativeHandle>>,
}

pub(crate) type ServiceRegistration = Registration<ServiceRegistrationInfo>;
pub(crate) type HostRegistration = Registration<HostRegistrationInfo>;

impl<T: PartialEq> Registration<T> {
    pub(crate) fn new(
        info: T,
        request_id: RequestId,
        native: Box<dyn NativeHandle>,
        callback: ResultCallback,
    ) -> Self {
        Self {
            info,
            request_id,
            callbacks: vec![callback],
            completed: false,
            native: Some(native),
        }
    }

    pub(crate) fn info(&self) -> &T {
        &self.info
    }

    pub(crate) fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed
    }

    /// Whether `other` describes something different from this registration
    pub(crate) fn is_outdated(&self, other: &T) -> bool {
        self.info != *other
    }

    /// Queue another caller on the pending outcome
    pub(crate) fn join(&mut self, callback: ResultCallback) {
        debug_assert!(!self.completed);
        self.callbacks.push(callback);
    }

    /// Answer every queued caller; later calls do nothing
    pub(crate) fn complete(&mut self, result: Result<()>) {
        if self.completed {
            return;
        }
        self.completed = true;

        for callback in core::mem::take(&mut self.callbacks) {
            callback(result.clone());
        }
    }

    /// Withdraw the native records now rather than on drop
    pub(crate) fn release(&mut self) -> Result<()> {
        match self.native.take() {
            Some(mut native) => native.release(),
            None => Ok(()),
        }
    }
}

impl<T> Drop for Registration<T> {
    fn drop(&mut self) {
        if !self.completed {
            self.completed = true;
            for callback in core::mem::take(&mut self.callbacks) {
                callback(Err(Error::Aborted));
            }
        }

        if let Some(mut native) = self.native.take() {
            if let Err(e) = native.release() {
                log::debug!("Releasing registration {} failed: {e}", self.request_id);
            }
        }
    }
}
