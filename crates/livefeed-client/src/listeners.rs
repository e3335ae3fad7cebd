//! 콜백 리스너 목록.
//!
//! 등록하면 [`ListenerGuard`]를 돌려주며, 가드를 drop하거나
//! [`ListenerGuard::unsubscribe`]를 호출하면 즉시 해제됩니다.
//! 해제는 공유 연결에 영향을 주지 않습니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// 이벤트 리스너 목록.
pub(crate) struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback<E>)>>,
}

impl<E: 'static> Listeners<E> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        })
    }

    /// 리스너 등록.
    pub(crate) fn add<F>(self: &Arc<Self>, callback: F) -> ListenerGuard
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, Arc::new(callback)));

        let weak: Weak<Self> = Arc::downgrade(self);
        ListenerGuard {
            remove: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    listeners.entries.lock().retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// 등록된 모든 리스너 호출.
    ///
    /// 목록을 복사한 뒤 락 밖에서 호출하므로 콜백 안에서 등록/해제해도 됩니다.
    pub(crate) fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// 리스너 해제 핸들.
#[must_use = "dropping the guard unregisters the listener"]
pub struct ListenerGuard {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerGuard {
    /// 리스너 해제.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
