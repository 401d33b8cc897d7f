use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::RscError;

pub type ScopeId = usize;

/// Innermost Suspense and ErrorBoundary enclosing a point in the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeContext {
    pub suspense: Option<ScopeId>,
    pub error_boundary: Option<ScopeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspenseState {
    Pending,
    Resolved,
    /// A slot inside the scope was rejected and no boundary within the
    /// scope captured it. The scope never resolves.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorBoundaryState {
    Normal,
    Failed(RscError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionOutcome {
    Captured(ScopeId),
    Unrecovered,
}

struct SuspenseScope {
    pending: usize,
    sealed: bool,
    state: watch::Sender<SuspenseState>,
}

struct ErrorScope {
    enclosing_suspense: Option<ScopeId>,
    state: watch::Sender<ErrorBoundaryState>,
}

#[derive(Default)]
struct Scopes {
    suspense: Vec<SuspenseScope>,
    error_boundaries: Vec<ErrorScope>,
    unrecovered: Option<RscError>,
    fulfilled: usize,
    rejected: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundaryStats {
    pub suspense_boundaries: usize,
    pub resolved_suspense: usize,
    pub error_boundaries: usize,
    pub failed_error_boundaries: usize,
    pub fulfilled_slots: usize,
    pub rejected_slots: usize,
}

/// Tracks pending slots per Suspense scope and failures per ErrorBoundary
/// scope for one decode.
#[derive(Default)]
pub struct BoundaryRuntime {
    scopes: Mutex<Scopes>,
}

impl BoundaryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a Suspense scope under `parent`. The scope stays pending at
    /// least until [`seal_suspense`](Self::seal_suspense) is called.
    pub fn open_suspense(&self, parent: ScopeContext) -> (ScopeContext, SuspenseHandle) {
        let mut scopes = self.scopes.lock();
        let id = scopes.suspense.len();
        let (sender, receiver) = watch::channel(SuspenseState::Pending);
        scopes.suspense.push(SuspenseScope { pending: 0, sealed: false, state: sender });

        (ScopeContext { suspense: Some(id), ..parent }, SuspenseHandle { id, state: receiver })
    }

    /// Marks the scope's direct contents as fully discovered.
    pub fn seal_suspense(&self, id: ScopeId) {
        let mut scopes = self.scopes.lock();
        if let Some(scope) = scopes.suspense.get_mut(id) {
            scope.sealed = true;
            resolve_if_settled(id, scope);
        }
    }

    pub fn open_error_boundary(&self, parent: ScopeContext) -> (ScopeContext, ErrorBoundaryHandle) {
        let mut scopes = self.scopes.lock();
        let id = scopes.error_boundaries.len();
        let (sender, receiver) = watch::channel(ErrorBoundaryState::Normal);
        scopes
            .error_boundaries
            .push(ErrorScope { enclosing_suspense: parent.suspense, state: sender });

        (
            ScopeContext { error_boundary: Some(id), ..parent },
            ErrorBoundaryHandle { id, state: receiver },
        )
    }

    /// Registers a pending slot discovered in `ctx`.
    pub fn track(&self, ctx: ScopeContext) {
        if let Some(id) = ctx.suspense {
            let mut scopes = self.scopes.lock();
            if let Some(scope) = scopes.suspense.get_mut(id) {
                scope.pending += 1;
            }
        }
    }

    /// Records a fulfilled slot. Slots nested in its value must already be
    /// tracked so the scope cannot resolve early.
    pub fn fulfil(&self, ctx: ScopeContext) {
        let mut scopes = self.scopes.lock();
        scopes.fulfilled += 1;

        if let Some(id) = ctx.suspense
            && let Some(scope) = scopes.suspense.get_mut(id)
        {
            scope.pending = scope.pending.saturating_sub(1);
            resolve_if_settled(id, scope);
        }
    }

    /// Records a rejected slot. The nearest ErrorBoundary captures it; a
    /// Suspense scope only counts the slot as settled when that boundary
    /// sits inside the same scope.
    pub fn reject(&self, ctx: ScopeContext, error: &RscError) -> RejectionOutcome {
        let mut scopes = self.scopes.lock();
        scopes.rejected += 1;

        let captured_by = ctx.error_boundary.filter(|id| *id < scopes.error_boundaries.len());

        let outcome = match captured_by {
            Some(id) => {
                let boundary = &scopes.error_boundaries[id];
                boundary.state.send_if_modified(|state| {
                    if *state == ErrorBoundaryState::Normal {
                        *state = ErrorBoundaryState::Failed(error.clone());
                        true
                    } else {
                        false
                    }
                });
                RejectionOutcome::Captured(id)
            }
            None => {
                if scopes.unrecovered.is_none() {
                    scopes.unrecovered = Some(error.clone());
                }
                RejectionOutcome::Unrecovered
            }
        };

        if let Some(suspense_id) = ctx.suspense {
            let contained = captured_by.is_some_and(|id| {
                scopes.error_boundaries[id].enclosing_suspense == Some(suspense_id)
            });

            if let Some(scope) = scopes.suspense.get_mut(suspense_id) {
                scope.pending = scope.pending.saturating_sub(1);
                if contained {
                    resolve_if_settled(suspense_id, scope);
                } else {
                    warn!("Suspense boundary {} abandoned after rejection", suspense_id);
                    scope.state.send_if_modified(|state| {
                        if *state == SuspenseState::Pending {
                            *state = SuspenseState::Abandoned;
                            true
                        } else {
                            false
                        }
                    });
                }
            }
        }

        outcome
    }

    /// Moves every still-pending Suspense scope to `Abandoned`. Used when the
    /// stream fails and no further rows will arrive.
    pub fn abandon_pending(&self) {
        let scopes = self.scopes.lock();
        for scope in &scopes.suspense {
            scope.state.send_if_modified(|state| {
                if *state == SuspenseState::Pending {
                    *state = SuspenseState::Abandoned;
                    true
                } else {
                    false
                }
            });
        }
    }

    pub fn unrecovered(&self) -> Option<RscError> {
        self.scopes.lock().unrecovered.clone()
    }

    pub fn suspense_state(&self, id: ScopeId) -> Option<SuspenseState> {
        self.scopes.lock().suspense.get(id).map(|scope| *scope.state.borrow())
    }

    pub fn stats(&self) -> BoundaryStats {
        let scopes = self.scopes.lock();
        BoundaryStats {
            suspense_boundaries: scopes.suspense.len(),
            resolved_suspense: scopes
                .suspense
                .iter()
                .filter(|scope| *scope.state.borrow() == SuspenseState::Resolved)
                .count(),
            error_boundaries: scopes.error_boundaries.len(),
            failed_error_boundaries: scopes
                .error_boundaries
                .iter()
                .filter(|scope| *scope.state.borrow() != ErrorBoundaryState::Normal)
                .count(),
            fulfilled_slots: scopes.fulfilled,
            rejected_slots: scopes.rejected,
        }
    }
}

fn resolve_if_settled(id: ScopeId, scope: &mut SuspenseScope) {
    if !scope.sealed || scope.pending > 0 {
        return;
    }

    let resolved = scope.state.send_if_modified(|state| {
        if *state == SuspenseState::Pending {
            *state = SuspenseState::Resolved;
            true
        } else {
            false
        }
    });

    if resolved {
        debug!("Suspense boundary {} resolved", id);
    }
}

#[derive(Debug, Clone)]
pub struct SuspenseHandle {
    id: ScopeId,
    state: watch::Receiver<SuspenseState>,
}

impl SuspenseHandle {
    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn state(&self) -> SuspenseState {
        *self.state.borrow()
    }

    pub fn is_resolved(&self) -> bool {
        self.state() == SuspenseState::Resolved
    }

    /// Waits until the scope leaves `Pending`.
    pub async fn settled(&self) -> SuspenseState {
        let mut receiver = self.state.clone();
        let settled =
            receiver.wait_for(|state| *state != SuspenseState::Pending).await.map(|state| *state);
        settled.unwrap_or_else(|_| *receiver.borrow())
    }
}

#[derive(Debug, Clone)]
pub struct ErrorBoundaryHandle {
    id: ScopeId,
    state: watch::Receiver<ErrorBoundaryState>,
}

impl ErrorBoundaryHandle {
    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn state(&self) -> ErrorBoundaryState {
        self.state.borrow().clone()
    }

    pub fn has_failed(&self) -> bool {
        matches!(*self.state.borrow(), ErrorBoundaryState::Failed(_))
    }

    pub fn error(&self) -> Option<RscError> {
        match &*self.state.borrow() {
            ErrorBoundaryState::Failed(error) => Some(error.clone()),
            ErrorBoundaryState::Normal => None,
        }
    }
}
