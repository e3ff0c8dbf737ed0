//! Best-effort screen wake lock.
//!
//! Capability is detected once. A revoked lock is re-requested after a short
//! delay while the page is visible; while hidden the retry waits for the next
//! visibility restore, and each restore gets exactly one attempt.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::lock;
use crate::platform::WakeLockPlatform;

#[derive(Debug, Default)]
struct WakeState {
    /// The host asked for the lock and has not released it.
    wanted: bool,
    held: bool,
    /// A platform request is in flight.
    requesting: bool,
    visible: bool,
    /// Revoked while hidden; retry on the next visibility restore.
    retry_on_visible: bool,
    watcher: Option<CancellationToken>,
}

struct Inner {
    platform: Arc<dyn WakeLockPlatform>,
    supported: bool,
    reacquire_delay: Duration,
    state: Mutex<WakeState>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct WakeLockController {
    inner: Arc<Inner>,
}

impl WakeLockController {
    pub fn new(platform: Arc<dyn WakeLockPlatform>, reacquire_delay: Duration) -> Self {
        let supported = platform.is_supported();
        if !supported {
            tracing::info!("wake lock unsupported; acquire/release are no-ops");
        }
        Self {
            inner: Arc::new(Inner {
                platform,
                supported,
                reacquire_delay,
                state: Mutex::new(WakeState {
                    visible: true,
                    ..WakeState::default()
                }),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.inner.supported
    }

    pub fn is_held(&self) -> bool {
        lock(&self.inner.state).held
    }

    /// Request the lock. Failure is logged, never returned.
    pub async fn acquire(&self) {
        if !self.inner.supported {
            return;
        }
        lock(&self.inner.state).wanted = true;
        Inner::request(&self.inner).await;
    }

    pub async fn release(&self) {
        if !self.inner.supported {
            return;
        }
        let was_held = {
            let mut state = lock(&self.inner.state);
            state.wanted = false;
            state.retry_on_visible = false;
            if let Some(watcher) = state.watcher.take() {
                watcher.cancel();
            }
            std::mem::replace(&mut state.held, false)
        };
        if was_held {
            if let Err(e) = self.inner.platform.release().await {
                tracing::warn!(error = %e, "wake lock release failed");
            }
        }
    }

    /// Track page visibility. A restore retries a lock revoked while hidden.
    pub async fn set_visible(&self, visible: bool) {
        let retry = {
            let mut state = lock(&self.inner.state);
            let restored = visible && !state.visible;
            state.visible = visible;
            if restored && state.retry_on_visible && state.wanted && !state.held {
                state.retry_on_visible = false;
                true
            } else {
                false
            }
        };
        if retry && self.inner.supported {
            tracing::debug!("visibility restored, re-requesting wake lock");
            Inner::request(&self.inner).await;
        }
    }
}

impl Inner {
    /// At most one platform request is in flight; callers arriving meanwhile
    /// return immediately.
    // `watch` awaits this and this spawns `watch`; the explicit `Send` bound
    // breaks the auto-trait cycle.
    fn request(this: &Arc<Self>) -> impl Future<Output = ()> + Send + '_ {
        async move {
            {
                let mut state = lock(&this.state);
                if state.held || state.requesting {
                    return;
                }
                state.requesting = true;
            }
            match this.platform.request().await {
                Ok(revoked) => {
                    let watcher = this.shutdown.child_token();
                    let wanted = {
                        let mut state = lock(&this.state);
                        state.requesting = false;
                        if state.wanted {
                            state.held = true;
                            if let Some(old) = state.watcher.replace(watcher.clone()) {
                                old.cancel();
                            }
                        }
                        state.wanted
                    };
                    if !wanted {
                        // Released while the request was in flight.
                        if let Err(e) = this.platform.release().await {
                            tracing::warn!(error = %e, "wake lock release failed");
                        }
                        return;
                    }
                    tracing::debug!("wake lock acquired");
                    tokio::spawn(Self::watch(Arc::clone(this), revoked, watcher));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "wake lock request failed");
                    let mut state = lock(&this.state);
                    state.requesting = false;
                    if state.wanted && !state.held {
                        state.retry_on_visible = true;
                    }
                }
            }
        }
    }

    async fn watch(this: Arc<Self>, revoked: oneshot::Receiver<()>, watcher: CancellationToken) {
        tokio::select! {
            _ = watcher.cancelled() => return,
            result = revoked => {
                // A dropped sender means the platform gave up tracking, not a revocation.
                if result.is_err() {
                    return;
                }
            }
        }

        let visible = {
            let mut state = lock(&this.state);
            state.held = false;
            state.watcher = None;
            if !state.wanted {
                return;
            }
            if !state.visible {
                state.retry_on_visible = true;
            }
            state.visible
        };
        if !visible {
            tracing::debug!("wake lock revoked while hidden; waiting for visibility");
            return;
        }

        tracing::debug!(delay_ms = this.reacquire_delay.as_millis() as u64, "wake lock revoked");
        tokio::select! {
            _ = this.shutdown.cancelled() => return,
            _ = tokio::time::sleep(this.reacquire_delay) => {}
        }

        let retry = {
            let mut state = lock(&this.state);
            if state.wanted && !state.held && state.visible {
                true
            } else {
                if state.wanted && !state.held {
                    state.retry_on_visible = true;
                }
                false
            }
        };
        if retry {
            Self::request(&this).await;
        }
    }
}
