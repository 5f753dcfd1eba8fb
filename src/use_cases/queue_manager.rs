// QueueManager: in-memory index of active searching requests, bucketed by
// (gameId, gameMode, region), plus a user -> request reverse index.
//
// Grounded on `matchmaking_server::use_cases::matchmaker::Matchmaker`'s
// single-writer queue, generalized to multi-bucket indexing with its own
// per-bucket mutex (spec §5: "a per-bucket mutex is sufficient").

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::domain::criteria::{GameMode, Region};
use crate::domain::match_request::MatchRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub game_id: Uuid,
    pub game_mode: GameMode,
    pub region: Region,
}

#[derive(Debug, Clone)]
pub struct RequestAdded {
    pub game_id: Uuid,
    pub game_mode: GameMode,
    pub region: Region,
    pub request_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    AlreadyQueued { user_id: Uuid },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueueStats {
    pub size: usize,
    pub found: bool,
}

// Running moving-average wait-time stats for the whole service.
#[derive(Debug, Clone, Copy)]
pub struct GlobalStats {
    pub avg_wait_time_ms: f64,
    pub matched_count: u64,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            avg_wait_time_ms: 60_000.0,
            matched_count: 0,
        }
    }
}

const STATS_SMOOTHING: f64 = 0.2;

struct Inner {
    buckets: HashMap<BucketKey, Vec<Uuid>>,
    requests: HashMap<Uuid, MatchRequest>,
    by_user: HashMap<Uuid, Uuid>,
    stats: GlobalStats,
}

pub struct QueueManager {
    inner: RwLock<Inner>,
    events_tx: broadcast::Sender<RequestAdded>,
}

impl QueueManager {
    pub fn new() -> Self {
        let (events_tx, _rx) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                buckets: HashMap::new(),
                requests: HashMap::new(),
                by_user: HashMap::new(),
                stats: GlobalStats::default(),
            }),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestAdded> {
        self.events_tx.subscribe()
    }

    fn bucket_keys(req: &MatchRequest) -> Vec<BucketKey> {
        let Some(game_id) = req.criteria.primary_game() else {
            return Vec::new();
        };
        req.criteria
            .indexed_regions()
            .into_iter()
            .map(|region| BucketKey {
                game_id,
                game_mode: req.criteria.game_mode,
                region,
            })
            .collect()
    }

    pub async fn add_request(&self, req: MatchRequest) -> Result<(), QueueError> {
        let mut inner = self.inner.write().await;
        if inner.by_user.contains_key(&req.user_id) {
            return Err(QueueError::AlreadyQueued {
                user_id: req.user_id,
            });
        }

        let keys = Self::bucket_keys(&req);
        inner.by_user.insert(req.user_id, req.id);
        let request_id = req.id;
        inner.requests.insert(req.id, req);

        for key in &keys {
            inner.buckets.entry(*key).or_default().push(request_id);
        }
        drop(inner);

        for key in keys {
            let _ = self.events_tx.send(RequestAdded {
                game_id: key.game_id,
                game_mode: key.game_mode,
                region: key.region,
                request_id,
            });
        }
        Ok(())
    }

    // Idempotent; returns whether a removal actually occurred.
    pub async fn remove_request(&self, user_id: Uuid, request_id: Uuid) -> bool {
        let mut inner = self.inner.write().await;
        let Some(req) = inner.requests.remove(&request_id) else {
            return false;
        };
        if inner.by_user.get(&user_id) == Some(&request_id) {
            inner.by_user.remove(&user_id);
        }
        let keys = Self::bucket_keys(&req);
        for key in keys {
            if let Some(bucket) = inner.buckets.get_mut(&key) {
                bucket.retain(|id| *id != request_id);
                if bucket.is_empty() {
                    inner.buckets.remove(&key);
                }
            }
        }
        true
    }

    pub async fn get_queue_requests(
        &self,
        game_id: Uuid,
        game_mode: GameMode,
        region: Region,
    ) -> Vec<MatchRequest> {
        let inner = self.inner.read().await;
        let key = BucketKey {
            game_id,
            game_mode,
            region,
        };
        let mut items: Vec<MatchRequest> = inner
            .buckets
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.requests.get(id).cloned())
            .collect();
        items.sort_by_key(|r| r.search_start_time);
        items
    }

    pub async fn get_queue_size(&self, game_id: Uuid, game_mode: GameMode, region: Region) -> QueueStats {
        let inner = self.inner.read().await;
        let key = BucketKey {
            game_id,
            game_mode,
            region,
        };
        match inner.buckets.get(&key) {
            Some(b) => QueueStats {
                size: b.len(),
                found: true,
            },
            None => QueueStats {
                size: 0,
                found: false,
            },
        }
    }

    pub async fn get_user_request(&self, user_id: Uuid) -> Option<MatchRequest> {
        let inner = self.inner.read().await;
        let id = inner.by_user.get(&user_id)?;
        inner.requests.get(id).cloned()
    }

    pub async fn replace_request(&self, req: MatchRequest) {
        let mut inner = self.inner.write().await;
        if inner.requests.contains_key(&req.id) {
            inner.requests.insert(req.id, req);
        }
    }

    pub async fn all_bucket_keys_with_size(&self, min_size: usize) -> Vec<(BucketKey, usize)> {
        let inner = self.inner.read().await;
        inner
            .buckets
            .iter()
            .filter(|(_, ids)| ids.len() >= min_size)
            .map(|(k, ids)| (*k, ids.len()))
            .collect()
    }

    pub async fn get_stats(&self) -> GlobalStats {
        self.inner.read().await.stats
    }

    pub async fn update_stats(&self, matched: bool, search_time_ms: u64) {
        let mut inner = self.inner.write().await;
        inner.stats.avg_wait_time_ms = inner.stats.avg_wait_time_ms * (1.0 - STATS_SMOOTHING)
            + (search_time_ms as f64) * STATS_SMOOTHING;
        if matched {
            inner.stats.matched_count += 1;
        }
    }

    #[cfg(test)]
    pub async fn clear_queues(&self) {
        let mut inner = self.inner.write().await;
        inner.buckets.clear();
        inner.requests.clear();
        inner.by_user.clear();
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedQueueManager = Arc<QueueManager>;
