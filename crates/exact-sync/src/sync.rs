// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{SyncOptions, gateway::Gateway};
use tokio::sync::mpsc::Sender;

/// Progress information for long-running operations.
///
/// Sync operations that walk many images or batches accept an optional
/// channel and send one update per completed item.
///
/// # Examples
///
/// ```rust
/// use exact_sync::Progress;
///
/// let progress = Progress {
///     current: 25,
///     total: 100,
/// };
/// let percentage = (progress.current as f64 / progress.total as f64) * 100.0;
/// assert_eq!(percentage, 25.0);
/// ```
#[derive(Debug, Clone)]
pub struct Progress {
    /// Current number of completed items.
    pub current: usize,
    /// Total number of items to process.
    pub total: usize,
}

pub(crate) async fn report(progress: &Option<Sender<Progress>>, current: usize, total: usize) {
    if let Some(progress) = progress {
        let _ = progress.send(Progress { current, total }).await;
    }
}

/// Synchronizes annotations between local tables and an EXACT server.
///
/// A synchronizer owns a [`Gateway`] and the [`SyncOptions`] limits. The
/// operations are grouped as in a typical session:
///
/// 1. [`resolve_target`][Self::resolve_target] (or the read-only
///    [`get_target`][Self::get_target]) finds or creates the team, image set,
///    product and annotation types.
/// 2. [`sync_images`][Self::sync_images] registers the local images once and
///    returns the local → remote id map.
/// 3. [`clear_annotations`][Self::clear_annotations] and
///    [`upload_annotations`][Self::upload_annotations] replace the uploaded
///    annotations in bounded batches.
///
/// [`read_annotations`][Self::read_annotations] is the independent read path.
///
/// All operations issue their remote calls from the calling task. None of
/// them retries, and none is resumable from a partial failure: callers re-run
/// the idempotent steps and treat already created or deleted entities as
/// done.
#[derive(Debug, Clone)]
pub struct Synchronizer<G> {
    pub(crate) gateway: G,
    pub(crate) options: SyncOptions,
}

impl<G: Gateway> Synchronizer<G> {
    pub fn new(gateway: G, options: SyncOptions) -> Self {
        Synchronizer { gateway, options }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }
}
