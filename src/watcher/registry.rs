//! The registry owning every active watcher.
//!
//! Lookups scan linearly; the number of concurrent subscribers is small.
//! When two watchers share an id, the first one added wins every lookup.

use super::{NativeStream, Watcher};
use crate::error::PluginError;
use crate::platform::{LocationPlatform, StreamToken};

/// Exclusive owner of all active watchers.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    watchers: Vec<Watcher>,
    next_token: u64,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a stream handle that has never been used before.
    pub fn allocate_stream(&mut self) -> NativeStream {
        self.next_token += 1;
        NativeStream::new(StreamToken(self.next_token))
    }

    pub fn add(&mut self, watcher: Watcher) {
        self.watchers.push(watcher);
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Watcher> {
        self.watchers.iter().find(|w| w.id() == id)
    }

    pub fn find_by_token(&self, token: StreamToken) -> Option<&Watcher> {
        self.watchers.iter().find(|w| w.token() == token)
    }

    pub fn find_by_token_mut(&mut self, token: StreamToken) -> Option<&mut Watcher> {
        self.watchers.iter_mut().find(|w| w.token() == token)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Watcher> {
        self.watchers.iter_mut()
    }

    pub fn ids(&self) -> Vec<String> {
        self.watchers.iter().map(|w| w.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Stop and remove the watcher registered under `id`.
    pub fn remove(
        &mut self,
        id: &str,
        platform: &mut dyn LocationPlatform,
    ) -> Result<(), PluginError> {
        let index = self
            .watchers
            .iter()
            .position(|w| w.id() == id)
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        self.watchers.remove(index).release(platform);
        Ok(())
    }

    /// Stop and remove the watcher owning `token`, returning its id.
    pub fn remove_by_token(
        &mut self,
        token: StreamToken,
        platform: &mut dyn LocationPlatform,
    ) -> Option<String> {
        let index = self.watchers.iter().position(|w| w.token() == token)?;
        let watcher = self.watchers.remove(index);
        let id = watcher.id().to_string();
        watcher.release(platform);
        Some(id)
    }

    /// Stop and remove every watcher.
    pub fn drain(&mut self, platform: &mut dyn LocationPlatform) -> usize {
        let count = self.watchers.len();
        for watcher in self.watchers.drain(..) {
            watcher.release(platform);
        }
        count
    }
}
