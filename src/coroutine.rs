//! The coroutine scheduler.
//!
//! Cooperative and logically single-threaded: each non-main coroutine body
//! runs on its own OS thread, but a pair of zero-capacity rendezvous
//! channels per coroutine guarantees that exactly one side executes
//! interpreter work at any moment. `resume` hands values to the coroutine
//! and parks until it yields, returns, or errors; `yield` hands values back
//! and parks until the next resume. The hand-off is a strict synchronous
//! rendezvous, so shared `Rc` state is only ever touched by the active side.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use log::debug;

use crate::error::{LuaError, LuaResult};
use crate::eval::Interpreter;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoStatus {
    Suspended,
    Running,
    /// Resumed another coroutine and is waiting for it.
    Normal,
    Dead,
}

impl CoStatus {
    pub fn name(&self) -> &'static str {
        match self {
            CoStatus::Suspended => "suspended",
            CoStatus::Running => "running",
            CoStatus::Normal => "normal",
            CoStatus::Dead => "dead",
        }
    }
}

enum ResumeMsg {
    Values(Vec<Value>),
    /// `coroutine.close`: the parked yield turns this into the cancellation
    /// signal, which unwinds the body running to-be-closed handlers.
    Cancel,
}

enum YieldMsg {
    Yield(Vec<Value>),
    Done(Vec<Value>),
    Error(LuaError),
}

/// Moves interpreter values across the thread boundary at a rendezvous.
///
/// SAFETY: the contents are `Rc`-based and not `Send`. Soundness rests on
/// the scheduling discipline, not the types: a message is only ever
/// constructed by the active side while the peer is parked in `recv`, and
/// ownership transfers at the rendezvous before the sender runs on. At no
/// point do two threads hold live clones of the same `Rc` while both are
/// runnable.
struct Parcel<T>(T);
unsafe impl<T> Send for Parcel<T> {}

/// The coroutine-side channel endpoints, held by the interpreter that runs
/// the body so `yield` can find its own rendezvous.
pub struct CoEndpoints {
    yield_tx: SyncSender<Parcel<YieldMsg>>,
    resume_rx: Receiver<Parcel<ResumeMsg>>,
}

/// A suspendable execution unit. The main thread is a distinguished
/// coroutine that is always `running` or `normal` and cannot yield.
pub struct Coroutine {
    status: Cell<CoStatus>,
    is_main: bool,
    /// The body function; taken when the coroutine first starts.
    body: RefCell<Option<Value>>,
    resume_tx: RefCell<Option<SyncSender<Parcel<ResumeMsg>>>>,
    yield_rx: RefCell<Option<Receiver<Parcel<YieldMsg>>>>,
    resumer: RefCell<Option<Rc<Coroutine>>>,
}

impl Coroutine {
    /// The distinguished main coroutine.
    pub fn main() -> Rc<Coroutine> {
        Rc::new(Coroutine {
            status: Cell::new(CoStatus::Running),
            is_main: true,
            body: RefCell::new(None),
            resume_tx: RefCell::new(None),
            yield_rx: RefCell::new(None),
            resumer: RefCell::new(None),
        })
    }

    /// A fresh suspended coroutine bound to `body`.
    pub fn new(body: Value) -> Rc<Coroutine> {
        Rc::new(Coroutine {
            status: Cell::new(CoStatus::Suspended),
            is_main: false,
            body: RefCell::new(Some(body)),
            resume_tx: RefCell::new(None),
            yield_rx: RefCell::new(None),
            resumer: RefCell::new(None),
        })
    }

    pub fn status(&self) -> CoStatus {
        self.status.get()
    }

    pub fn is_main(&self) -> bool {
        self.is_main
    }

    fn set_status(&self, s: CoStatus) {
        self.status.set(s);
    }

    fn started(&self) -> bool {
        self.resume_tx.borrow().is_some()
    }

    fn send_resume(&self, msg: ResumeMsg) -> Result<(), ()> {
        match &*self.resume_tx.borrow() {
            Some(tx) => tx.send(Parcel(msg)).map_err(|_| ()),
            None => Err(()),
        }
    }

    fn recv_yield(&self) -> YieldMsg {
        let rx = self.yield_rx.borrow();
        match rx.as_ref().map(|rx| rx.recv()) {
            Some(Ok(Parcel(msg))) => msg,
            _ => YieldMsg::Error(LuaError::runtime("coroutine terminated abnormally")),
        }
    }
}

fn failure(msg: &str) -> Value {
    Value::Multi(vec![Value::Boolean(false), Value::string(msg)])
}

fn success(mut vals: Vec<Value>) -> Value {
    let mut out = vec![Value::Boolean(true)];
    out.append(&mut vals);
    Value::Multi(out)
}

/// `coroutine.resume(co, ...)`: transfers control to `co` until it yields,
/// returns, or errors. Produces `true, results...` or `false, err` as a
/// multi-value; resume misuse is reported in-band, not raised.
pub fn resume(interp: &mut Interpreter, co: &Rc<Coroutine>, args: Vec<Value>) -> LuaResult<Value> {
    if co.is_main {
        return Ok(failure("cannot resume non-suspended coroutine"));
    }
    match co.status() {
        CoStatus::Dead => return Ok(failure("cannot resume dead coroutine")),
        CoStatus::Running | CoStatus::Normal => {
            return Ok(failure("cannot resume non-suspended coroutine"))
        }
        CoStatus::Suspended => {}
    }

    let resumer = Rc::clone(&interp.current_co);
    resumer.set_status(CoStatus::Normal);
    *co.resumer.borrow_mut() = Some(Rc::clone(&resumer));
    co.set_status(CoStatus::Running);

    if !co.started() {
        if let Err(e) = start(interp, co, args) {
            co.set_status(CoStatus::Dead);
            resumer.set_status(CoStatus::Running);
            return Err(e);
        }
    } else if co.send_resume(ResumeMsg::Values(args)).is_err() {
        co.set_status(CoStatus::Dead);
        resumer.set_status(CoStatus::Running);
        return Ok(failure("coroutine terminated abnormally"));
    }

    // Park until the coroutine hands control back.
    let msg = co.recv_yield();
    *co.resumer.borrow_mut() = None;
    resumer.set_status(CoStatus::Running);

    Ok(match msg {
        YieldMsg::Yield(vals) => {
            co.set_status(CoStatus::Suspended);
            success(vals)
        }
        YieldMsg::Done(vals) => {
            co.set_status(CoStatus::Dead);
            success(vals)
        }
        YieldMsg::Error(e) => {
            co.set_status(CoStatus::Dead);
            Value::Multi(vec![Value::Boolean(false), e.payload()])
        }
    })
}

/// First resume: spawn the body thread and hand it the initial arguments.
fn start(interp: &mut Interpreter, co: &Rc<Coroutine>, args: Vec<Value>) -> LuaResult<()> {
    let body = co
        .body
        .borrow_mut()
        .take()
        .ok_or_else(|| LuaError::runtime("cannot resume dead coroutine"))?;

    let (resume_tx, resume_rx) = sync_channel::<Parcel<ResumeMsg>>(0);
    let (yield_tx, yield_rx) = sync_channel::<Parcel<YieldMsg>>(0);
    *co.resume_tx.borrow_mut() = Some(resume_tx);
    *co.yield_rx.borrow_mut() = Some(yield_rx);

    let parcel = Parcel((
        body,
        args,
        Rc::clone(&interp.shared),
        Rc::clone(co),
        resume_rx,
        yield_tx.clone(),
    ));

    std::thread::Builder::new()
        .name("lua-coroutine".to_string())
        .spawn(move || {
            let parcel = parcel;
            let Parcel((body, args, shared, co, resume_rx, yield_tx)) = parcel;
            let endpoints = Rc::new(CoEndpoints {
                yield_tx: yield_tx.clone(),
                resume_rx,
            });
            let mut co_interp =
                Interpreter::fork_for_coroutine(shared, co, Rc::clone(&endpoints));
            let result = co_interp.call_value(body, args);
            // Every shared Rc must be dropped before the final hand-off;
            // the resumer is parked in recv until the send below, so these
            // drops are exclusive.
            drop(co_interp);
            drop(endpoints);
            let msg = match result {
                Ok(v) => YieldMsg::Done(v.into_vec()),
                Err(e) => YieldMsg::Error(e),
            };
            let _ = yield_tx.send(Parcel(msg));
        })
        .map_err(|e| LuaError::runtime(format!("cannot start coroutine: {}", e)))?;
    Ok(())
}

/// `coroutine.yield(...)`: parks the running coroutine and hands the values
/// to its resumer. Returns the arguments of the next resume.
pub fn yield_values(interp: &mut Interpreter, args: Vec<Value>) -> LuaResult<Value> {
    let endpoints = match &interp.co_endpoints {
        Some(ep) => Rc::clone(ep),
        None => {
            return Err(LuaError::runtime(
                "attempt to yield from outside a coroutine",
            ))
        }
    };
    if interp.non_yieldable > 0 {
        return Err(LuaError::runtime(
            "attempt to yield across a C-call boundary",
        ));
    }

    if endpoints
        .yield_tx
        .send(Parcel(YieldMsg::Yield(args)))
        .is_err()
    {
        abandoned();
    }
    match endpoints.resume_rx.recv() {
        Ok(Parcel(ResumeMsg::Values(vals))) => Ok(Value::Multi(vals)),
        Ok(Parcel(ResumeMsg::Cancel)) => Err(LuaError::Cancelled),
        Err(_) => abandoned(),
    }
}

/// The owner vanished while this coroutine was suspended. Unwinding here
/// would drop `Rc` clones of shared state concurrently with whatever thread
/// still runs, so the thread parks forever instead; its memory is reclaimed
/// at process exit (matching the lifetime of an uncollected suspended
/// coroutine).
fn abandoned() -> ! {
    debug!("coroutine abandoned by its owner; parking thread");
    loop {
        std::thread::park();
    }
}

/// `coroutine.close(co)`: cancels a suspended coroutine, running its
/// pending to-be-closed handlers, then marks it dead.
pub fn close(interp: &mut Interpreter, co: &Rc<Coroutine>) -> LuaResult<Value> {
    if co.is_main || Rc::ptr_eq(co, &interp.current_co) {
        return Err(LuaError::runtime("cannot close a running coroutine"));
    }
    match co.status() {
        CoStatus::Dead => Ok(Value::Multi(vec![Value::Boolean(true)])),
        CoStatus::Running | CoStatus::Normal => {
            Err(LuaError::runtime("cannot close a normal coroutine"))
        }
        CoStatus::Suspended => {
            if !co.started() {
                co.set_status(CoStatus::Dead);
                return Ok(Value::Multi(vec![Value::Boolean(true)]));
            }
            if co.send_resume(ResumeMsg::Cancel).is_err() {
                co.set_status(CoStatus::Dead);
                return Ok(Value::Multi(vec![Value::Boolean(true)]));
            }
            let msg = co.recv_yield();
            co.set_status(CoStatus::Dead);
            match msg {
                YieldMsg::Error(LuaError::Cancelled) => {
                    Ok(Value::Multi(vec![Value::Boolean(true)]))
                }
                YieldMsg::Error(e) => Ok(Value::Multi(vec![Value::Boolean(false), e.payload()])),
                YieldMsg::Done(_) | YieldMsg::Yield(_) => {
                    Ok(Value::Multi(vec![Value::Boolean(true)]))
                }
            }
        }
    }
}

/// `coroutine.status(co)` as seen from the current interpreter.
pub fn status_name(interp: &Interpreter, co: &Rc<Coroutine>) -> &'static str {
    if Rc::ptr_eq(co, &interp.current_co) {
        "running"
    } else {
        co.status().name()
    }
}

/// `coroutine.isyieldable()`.
pub fn is_yieldable(interp: &Interpreter) -> bool {
    !interp.current_co.is_main() && interp.non_yieldable == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(CoStatus::Suspended.name(), "suspended");
        assert_eq!(CoStatus::Running.name(), "running");
        assert_eq!(CoStatus::Normal.name(), "normal");
        assert_eq!(CoStatus::Dead.name(), "dead");
    }

    #[test]
    fn test_main_coroutine_shape() {
        let main = Coroutine::main();
        assert!(main.is_main());
        assert_eq!(main.status(), CoStatus::Running);
        assert!(!main.started());
    }

    #[test]
    fn test_new_coroutine_suspended() {
        let co = Coroutine::new(Value::Nil);
        assert!(!co.is_main());
        assert_eq!(co.status(), CoStatus::Suspended);
    }
}
