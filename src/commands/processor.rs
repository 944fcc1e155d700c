//! Command Processor
//!
//! The processor owns every [`Dataset`] and every [`Session`]. It is driven by
//! exactly one worker, so handlers mutate state without any locking.
//!
//! ## Request flow
//!
//! ```text
//!  request frame ──> validate ──> in multi? ──yes──> queue, reply "queued"
//!                                    │
//!                                    no
//!                                    ▼
//!                                 dispatch ──> handler ──> reply frame
//!                                                 │
//!                                                 ├──> touch watchers
//!                                                 └──> emit Record (append log)
//! ```
//!
//! ## Transactions
//!
//! `watch` registers interest in keys of the selected dataset. While a session
//! is queuing (`multi`), any write to one of its watched keys marks it dirty,
//! and `exec` then returns an empty array without running the queue.

use crate::commands::args;
use crate::commands::error::CommandError;
use crate::commands::names;
use crate::commands::record::Record;
use crate::commands::session::{Origin, Session};
use crate::protocol::Frame;
use crate::storage::{unix_nanos, Dataset, FrozenSnapshot, Phase, SessionId, SnapshotError, Value};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Default number of datasets.
pub const DEFAULT_DATABASES: usize = 16;

/// Commands executed immediately even while a transaction is queuing.
fn is_transaction_control(name: &str) -> bool {
    matches!(
        name,
        names::MULTI | names::EXEC | names::DISCARD | names::WATCH
    )
}

pub struct Processor {
    datasets: Vec<Dataset>,
    sessions: HashMap<SessionId, Session>,
    next_session: SessionId,
    records: Option<mpsc::UnboundedSender<Record>>,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("datasets", &self.datasets.len())
            .field("sessions", &self.sessions.len())
            .field("recording", &self.records.is_some())
            .finish()
    }
}

impl Default for Processor {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASES)
    }
}

impl Processor {
    /// Creates a processor with `databases` empty datasets (at least one).
    pub fn new(databases: usize) -> Self {
        Self {
            datasets: (0..databases.max(1)).map(Dataset::new).collect(),
            sessions: HashMap::new(),
            next_session: 1,
            records: None,
        }
    }

    /// Sends a [`Record`] for every successful write to `tx`.
    pub fn with_records(mut self, tx: mpsc::UnboundedSender<Record>) -> Self {
        self.records = Some(tx);
        self
    }

    pub fn database_count(&self) -> usize {
        self.datasets.len()
    }

    pub fn dataset(&self, index: usize) -> Option<&Dataset> {
        self.datasets.get(index)
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn open_session(&mut self, origin: Origin) -> SessionId {
        let id = self.next_session;
        self.next_session += 1;
        self.sessions.insert(id, Session::new(id, origin));
        trace!(session = id, ?origin, "Session opened");
        id
    }

    /// Drops a session and everything it watches.
    pub fn close_session(&mut self, id: SessionId) {
        if let Some(mut session) = self.sessions.remove(&id) {
            self.unwatch_all(&mut session);
            trace!(session = id, "Session closed");
        }
    }

    /// Executes one request on behalf of a session and returns the reply.
    pub fn execute(&mut self, id: SessionId, request: Frame) -> Frame {
        // Taken out of the map so handlers can touch other sessions freely.
        let Some(mut session) = self.sessions.remove(&id) else {
            return CommandError::UnknownSession(id).into();
        };
        let reply = self.execute_in(&mut session, request);
        self.sessions.insert(id, session);
        reply
    }

    fn execute_in(&mut self, session: &mut Session, request: Frame) -> Frame {
        let args = match request {
            Frame::Array(args) if !args.is_empty() => args,
            Frame::Array(_) => return CommandError::EmptyRequest.into(),
            other => return CommandError::NotArray(other.type_name()).into(),
        };

        let name = match args::string(&args[0], "command") {
            Ok(name) => name,
            Err(e) => return e.into(),
        };

        if session.multi && !is_transaction_control(name) {
            session.queue.push(Frame::Array(args));
            return Frame::queued();
        }

        trace!(session = session.id(), command = name, "Executing");
        match self.dispatch(session, name, &args[1..]) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(session = session.id(), command = name, error = %e, "Command failed");
                e.into()
            }
        }
    }

    fn dispatch(
        &mut self,
        session: &mut Session,
        name: &str,
        args: &[Frame],
    ) -> Result<Frame, CommandError> {
        match name {
            names::PING => Ok(Frame::pong()),
            names::GET => self.cmd_get(session, args),
            names::SET => self.cmd_set(session, args),
            names::DEL => self.cmd_del(session, args),
            names::INCR => self.cmd_step(session, args, names::INCR, 1),
            names::DESC => self.cmd_step(session, args, names::DESC, -1),
            names::MULTI => self.cmd_multi(session),
            names::EXEC => self.cmd_exec(session),
            names::DISCARD => self.cmd_discard(session),
            names::WATCH => self.cmd_watch(session, args),
            names::UNWATCH => self.cmd_unwatch(session),
            names::SELECT => self.cmd_select(session, args),
            _ => Err(CommandError::UnknownCommand(name.to_string())),
        }
    }

    // ========================================================================
    // Snapshot control
    // ========================================================================

    /// Freezes a dataset and returns a handle on its frozen generation.
    pub fn freeze(&mut self, db: usize) -> Result<FrozenSnapshot, SnapshotError> {
        let dataset = self
            .datasets
            .get_mut(db)
            .ok_or(SnapshotError::NoSuchDataset(db))?;
        dataset.freeze()?;
        dataset
            .frozen_snapshot()
            .ok_or(SnapshotError::NotFrozen(db))
    }

    /// Starts migrating a frozen dataset back.
    pub fn to_move(&mut self, db: usize) -> Result<(), SnapshotError> {
        self.datasets
            .get_mut(db)
            .ok_or(SnapshotError::NoSuchDataset(db))?
            .to_move()
    }

    /// Marks the point in the record stream that the next snapshot covers.
    pub fn checkpoint(&mut self) {
        self.emit(Record::Checkpoint);
    }

    /// Migrates one batch in every moving dataset. Returns whether any
    /// dataset is still moving.
    pub fn migrate_idle(&mut self) -> bool {
        let mut moving = false;
        for dataset in &mut self.datasets {
            if dataset.phase() == Phase::Moving {
                moving |= dataset.migrate();
            }
        }
        moving
    }

    // ========================================================================
    // Write helpers
    // ========================================================================

    fn write(&mut self, session: &Session, key: &str, value: Value, expire_at: i64) -> Value {
        let db = session.db;
        let stored = self.datasets[db].set(key, value, expire_at);
        self.touch(db, key);
        if session.records_writes() {
            self.emit(Record::set(db, key, &stored, expire_at));
        }
        stored
    }

    fn remove(&mut self, session: &Session, key: &str) -> bool {
        let db = session.db;
        let existed = self.datasets[db].delete(key);
        if existed {
            self.touch(db, key);
            if session.records_writes() {
                self.emit(Record::del(db, key));
            }
        }
        existed
    }

    /// Marks every queuing watcher of `key` dirty.
    fn touch(&mut self, db: usize, key: &str) {
        for id in self.datasets[db].watch_registry().watchers(key) {
            if let Some(watcher) = self.sessions.get_mut(id) {
                if watcher.multi {
                    watcher.dirty = true;
                }
            }
        }
    }

    fn emit(&mut self, record: Record) {
        if let Some(tx) = &self.records {
            if tx.send(record).is_err() {
                warn!("Record stream closed, writes are no longer persisted");
                self.records = None;
            }
        }
    }

    fn unwatch_all(&mut self, session: &mut Session) {
        let id = session.id();
        for (db, key) in session.watched.drain(..) {
            self.datasets[db].watch_registry_mut().unwatch(id, &key);
        }
        session.dirty = false;
    }

    // ========================================================================
    // Key commands
    // ========================================================================

    /// get key
    fn cmd_get(&mut self, session: &Session, args: &[Frame]) -> Result<Frame, CommandError> {
        let key = args::key(args, 0, names::GET)?;
        Ok(match self.datasets[session.db].get(key) {
            Some(value) => Frame::Bulk(value.to_bulk()),
            None => Frame::Null,
        })
    }

    /// set key value [EX seconds | PX milliseconds | PT unix-nanos]
    fn cmd_set(&mut self, session: &Session, args: &[Frame]) -> Result<Frame, CommandError> {
        let key = args::key(args, 0, names::SET)?;
        let value = args::value(args::nth(args, 1, names::SET)?)?;
        let expire_at = parse_expiration(&args[2..], unix_nanos())?;

        self.write(session, key, value, expire_at);
        Ok(Frame::ok())
    }

    /// del key [key ...]
    fn cmd_del(&mut self, session: &Session, args: &[Frame]) -> Result<Frame, CommandError> {
        args::nth(args, 0, names::DEL)?;
        let keys = args
            .iter()
            .map(|frame| args::string(frame, "key"))
            .collect::<Result<Vec<_>, _>>()?;

        let removed = keys.into_iter().filter(|key| self.remove(session, key)).count();
        Ok(Frame::integer(removed as i64))
    }

    /// incr key / desc key
    fn cmd_step(
        &mut self,
        session: &Session,
        args: &[Frame],
        command: &'static str,
        delta: i64,
    ) -> Result<Frame, CommandError> {
        let key = args::key(args, 0, command)?;
        let next = match self.datasets[session.db].get(key) {
            Some(current) => current
                .to_integer()?
                .checked_add(delta)
                .ok_or(CommandError::Overflow)?,
            None => delta,
        };

        self.write(session, key, Value::Int(next), 0);
        Ok(Frame::integer(next))
    }

    // ========================================================================
    // Transaction commands
    // ========================================================================

    /// multi
    fn cmd_multi(&mut self, session: &mut Session) -> Result<Frame, CommandError> {
        if session.multi {
            return Err(CommandError::NestedMulti);
        }
        session.multi = true;
        session.dirty = false;
        Ok(Frame::ok())
    }

    /// exec
    fn cmd_exec(&mut self, session: &mut Session) -> Result<Frame, CommandError> {
        if !session.multi {
            return Err(CommandError::ExecWithoutMulti);
        }
        session.multi = false;
        let queued = std::mem::take(&mut session.queue);

        let replies = if session.dirty {
            debug!(session = session.id(), discarded = queued.len(), "Transaction aborted, watched key changed");
            Vec::new()
        } else {
            queued
                .into_iter()
                .map(|request| self.execute_in(session, request))
                .collect()
        };

        self.unwatch_all(session);
        Ok(Frame::array(replies))
    }

    /// discard
    fn cmd_discard(&mut self, session: &mut Session) -> Result<Frame, CommandError> {
        if !session.multi {
            return Err(CommandError::DiscardWithoutMulti);
        }
        session.multi = false;
        session.queue.clear();
        self.unwatch_all(session);
        Ok(Frame::ok())
    }

    /// watch key [key ...]
    fn cmd_watch(&mut self, session: &mut Session, args: &[Frame]) -> Result<Frame, CommandError> {
        args::nth(args, 0, names::WATCH)?;
        if session.multi {
            return Err(CommandError::WatchInsideMulti);
        }
        let keys = args
            .iter()
            .map(|frame| args::string(frame, "key"))
            .collect::<Result<Vec<_>, _>>()?;

        let db = session.db;
        for key in keys {
            if self.datasets[db].watch_registry_mut().watch(session.id(), key) {
                session.watched.push((db, key.to_string()));
            }
        }
        Ok(Frame::ok())
    }

    /// unwatch
    fn cmd_unwatch(&mut self, session: &mut Session) -> Result<Frame, CommandError> {
        self.unwatch_all(session);
        Ok(Frame::ok())
    }

    /// select index
    fn cmd_select(&mut self, session: &mut Session, args: &[Frame]) -> Result<Frame, CommandError> {
        let index = args::integer(args::nth(args, 0, names::SELECT)?, "index")?;
        let count = self.datasets.len();
        if index < 0 || index as usize >= count {
            return Err(CommandError::DatabaseOutOfRange { index, count });
        }
        session.db = index as usize;
        Ok(Frame::ok())
    }
}

/// Parses the optional expiration of `set` into an absolute deadline.
fn parse_expiration(options: &[Frame], now: i64) -> Result<i64, CommandError> {
    let mut expire_at = 0;
    let mut seen = false;
    let mut i = 0;

    while i < options.len() {
        let option = args::string(&options[i], "argument")?;
        let scale = match option {
            names::EXPIRE_SECONDS => 1_000_000_000,
            names::EXPIRE_MILLIS => 1_000_000,
            names::EXPIRE_AT_NANOS => 0,
            other => return Err(CommandError::UnknownOption(other.to_string())),
        };
        if seen {
            return Err(CommandError::DuplicateExpiration);
        }
        seen = true;

        let amount = options
            .get(i + 1)
            .ok_or_else(|| CommandError::OptionMissing(option.to_string()))?;
        let amount = args::integer(amount, "timeout")?;
        if amount <= 0 {
            return Err(CommandError::InvalidExpire(option.to_string()));
        }

        expire_at = if scale == 0 {
            amount
        } else {
            amount.saturating_mul(scale).saturating_add(now)
        };
        i += 2;
    }

    Ok(expire_at)
}
