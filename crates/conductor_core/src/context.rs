//! The shared, mutable data area of one service invocation.
//!
//! Every action of a run receives the same [`ExecutionContext`] by reference,
//! including the children of a parallel block that run concurrently. Each
//! method takes its lock only for the duration of the call, so single reads
//! and writes are race free, but nothing orders writes made by concurrent
//! children. Children that write the same field or sheet must coordinate
//! among themselves.

use crate::error::{EngineError, EngineResult};
use crate::message::{Message, MessageKind};
use crate::resource::MessagingSession;
use crate::sheet::Sheet;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

/// Data area shared by all actions of a run
pub struct ExecutionContext {
    service_name: String,
    fields: RwLock<IndexMap<String, Value>>,
    sheets: RwLock<IndexMap<String, Sheet>>,
    messages: Mutex<Vec<Message>>,
    nbr_errors: AtomicUsize,
    messaging: RwLock<Option<Arc<dyn MessagingSession>>>,
    transaction_delegated: AtomicBool,
    iterating: Mutex<HashSet<String>>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Create an empty context for `service_name`
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            fields: RwLock::new(IndexMap::new()),
            sheets: RwLock::new(IndexMap::new()),
            messages: Mutex::new(Vec::new()),
            nbr_errors: AtomicUsize::new(0),
            messaging: RwLock::new(None),
            transaction_delegated: AtomicBool::new(false),
            iterating: Mutex::new(HashSet::new()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Seed a field
    #[must_use]
    pub fn with_value(self, name: &str, value: impl Into<Value>) -> Self {
        self.set_value(name, value);
        self
    }

    /// Seed a sheet
    #[must_use]
    pub fn with_sheet(self, name: &str, sheet: Sheet) -> Self {
        self.put_sheet(name, sheet);
        self
    }

    /// Name of the service this context was created for
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    // fields

    /// Value of a field
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<Value> {
        read(&self.fields).get(name).cloned()
    }

    /// Does the field exist?
    #[must_use]
    pub fn has_value(&self, name: &str) -> bool {
        read(&self.fields).contains_key(name)
    }

    /// Set a field, returning the previous value
    pub fn set_value(&self, name: &str, value: impl Into<Value>) -> Option<Value> {
        write(&self.fields).insert(name.to_string(), value.into())
    }

    /// Remove a field, returning its value
    pub fn remove_value(&self, name: &str) -> Option<Value> {
        write(&self.fields).shift_remove(name)
    }

    /// Copy of all fields
    #[must_use]
    pub fn fields_snapshot(&self) -> IndexMap<String, Value> {
        read(&self.fields).clone()
    }

    // sheets

    /// Copy of a sheet
    #[must_use]
    pub fn sheet(&self, name: &str) -> Option<Sheet> {
        read(&self.sheets).get(name).cloned()
    }

    /// Does the sheet exist?
    #[must_use]
    pub fn has_sheet(&self, name: &str) -> bool {
        read(&self.sheets).contains_key(name)
    }

    /// Put a sheet, returning the one it replaced
    pub fn put_sheet(&self, name: &str, sheet: Sheet) -> Option<Sheet> {
        write(&self.sheets).insert(name.to_string(), sheet)
    }

    /// Remove a sheet
    pub fn remove_sheet(&self, name: &str) -> Option<Sheet> {
        write(&self.sheets).shift_remove(name)
    }

    /// Number of rows in a sheet, 0 when it does not exist
    #[must_use]
    pub fn nbr_rows_in_sheet(&self, name: &str) -> usize {
        read(&self.sheets).get(name).map_or(0, Sheet::len)
    }

    /// Read a sheet in place
    pub fn read_sheet<R>(&self, name: &str, f: impl FnOnce(&Sheet) -> R) -> Option<R> {
        read(&self.sheets).get(name).map(f)
    }

    /// Modify a sheet in place
    pub fn update_sheet<R>(&self, name: &str, f: impl FnOnce(&mut Sheet) -> R) -> Option<R> {
        write(&self.sheets).get_mut(name).map(f)
    }

    /// Names of all sheets
    #[must_use]
    pub fn sheet_names(&self) -> Vec<String> {
        read(&self.sheets).keys().cloned().collect()
    }

    /// Mark `sheet` as being iterated until the guard is dropped
    ///
    /// # Errors
    ///
    /// Returns error if an enclosing loop is already iterating the sheet
    pub fn start_iteration(&self, sheet: &str) -> EngineResult<IterationGuard<'_>> {
        let mut iterating = lock(&self.iterating);
        if !iterating.insert(sheet.to_string()) {
            return Err(EngineError::SheetAlreadyIterating {
                sheet: sheet.to_string(),
            });
        }
        Ok(IterationGuard {
            ctx: self,
            sheet: sheet.to_string(),
        })
    }

    // messages

    /// Add a message, returning its kind
    pub fn add_message(&self, message: Message) -> MessageKind {
        let kind = message.kind;
        if kind == MessageKind::Error {
            self.nbr_errors.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(service = %self.service_name, id = %message.id, "error message added");
        }
        lock(&self.messages).push(message);
        kind
    }

    /// All messages added so far
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.messages).clone()
    }

    /// Has any error message been added?
    #[must_use]
    pub fn is_in_error(&self) -> bool {
        self.nbr_errors.load(Ordering::SeqCst) > 0
    }

    /// Drop all messages and reset the error state
    pub fn clear_messages(&self) {
        lock(&self.messages).clear();
        self.nbr_errors.store(0, Ordering::SeqCst);
    }

    // resources

    /// Messaging session borrowed for this run, if any
    #[must_use]
    pub fn messaging_session(&self) -> Option<Arc<dyn MessagingSession>> {
        read(&self.messaging).clone()
    }

    /// Set or clear the messaging session
    pub fn set_messaging_session(
        &self,
        session: Option<Arc<dyn MessagingSession>>,
    ) -> Option<Arc<dyn MessagingSession>> {
        std::mem::replace(&mut *write(&self.messaging), session)
    }

    /// Has the top-level processor delegated transactions to its actions?
    #[must_use]
    pub fn is_transaction_delegated(&self) -> bool {
        self.transaction_delegated.load(Ordering::SeqCst)
    }

    /// Record transaction delegation
    pub fn set_transaction_delegated(&self, delegated: bool) {
        self.transaction_delegated.store(delegated, Ordering::SeqCst);
    }

    /// Token used for cooperative interruption
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Has an interruption been requested?
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// One line summary used in logs
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "service={} fields={} sheets={} messages={} errors={}",
            self.service_name,
            read(&self.fields).len(),
            read(&self.sheets).len(),
            lock(&self.messages).len(),
            self.nbr_errors.load(Ordering::SeqCst)
        )
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Releases a sheet iteration mark on drop
pub struct IterationGuard<'a> {
    ctx: &'a ExecutionContext,
    sheet: String,
}

impl Drop for IterationGuard<'_> {
    fn drop(&mut self) {
        lock(&self.ctx.iterating).remove(&self.sheet);
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
