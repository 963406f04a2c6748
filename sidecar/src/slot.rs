// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Arc;

use tokio::sync::RwLock;

/// Holds the most recently published value of `T`.
///
/// A renewal task owns publication; HTTP handlers read. Values are replaced
/// whole behind an `Arc`, so a reader sees either the previous value or the
/// new one and never holds the lock while it encodes a response.
pub struct Slot<T> {
    current: RwLock<Option<Arc<T>>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    pub async fn publish(&self, value: T) {
        let value = Arc::new(value);
        *self.current.write().await = Some(value);
    }

    pub async fn current(&self) -> Option<Arc<T>> {
        self.current.read().await.clone()
    }
}
