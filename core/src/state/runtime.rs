//! The shared global state every operation threads through: heap, interner,
//! collector, registry and the host-supplied memory policy.

use std::mem::size_of;
use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use tracing::{debug, error, trace};

use crate::config::RuntimeConfig;
use crate::gc::Collector;
use crate::intern::StringTable;
use crate::obj::string::hash_bytes;
use crate::obj::table::Table;
use crate::obj::{GcHeader, GcRef, Heap, Marked, ObjectBody};
use crate::val::{NUM_VALUE_KINDS, StrRef, Tag, Value};

use super::alloc::{Allocator, LimitedAllocator, UnboundedAllocator};
use super::call::Executor;
use super::thread::LuaThread;
use super::{RuntimeError, ThreadRef};

/// Registry slot holding the main thread.
pub const REGISTRY_MAIN_THREAD: i64 = 1;
/// Registry slot holding the globals table.
pub const REGISTRY_GLOBALS: i64 = 2;

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Per-instance hash seed mixed from time and address-space entropy.
fn make_seed(anchor: usize) -> u32 {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let local = 0u8;
    let mut buf = Vec::with_capacity(40);
    buf.extend_from_slice(&wall.to_le_bytes());
    buf.extend_from_slice(&(PROCESS_START.elapsed().as_nanos() as u64).to_le_bytes());
    buf.extend_from_slice(&anchor.to_le_bytes());
    buf.extend_from_slice(&(&local as *const u8 as usize).to_le_bytes());
    let this: fn(usize) -> u32 = make_seed;
    buf.extend_from_slice(&(this as usize).to_le_bytes());
    hash_bytes(&buf, wall as u32)
}

/// Called once when an error escapes every protected boundary.
pub type PanicHandler = Box<dyn FnMut(&RuntimeError)>;

/// One runtime instance. Every execution context shares its heap; only one
/// of them runs at a time.
pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) strings: StringTable,
    pub(crate) gc: Collector,
    allocator: Box<dyn Allocator>,
    pub(crate) seed: u32,
    pub(crate) config: RuntimeConfig,
    pub(crate) registry: GcRef,
    pub(crate) main_thread: ThreadRef,
    /// Thread currently running; finalizers run on it.
    pub(crate) current: ThreadRef,
    pub(crate) type_metatables: [Option<GcRef>; NUM_VALUE_KINDS],
    pub(crate) tm_names: Vec<GcRef>,
    pub(crate) memerrmsg: Option<StrRef>,
    panic: Option<PanicHandler>,
    pub(crate) executor: Option<Rc<dyn Executor>>,
    /// Active protected boundaries.
    pub(crate) protected: u32,
    pub(crate) unusable: bool,
    /// Construction finished; emergency collections are allowed.
    built: bool,
    pub(crate) closing: bool,
    closed: bool,
}

impl Runtime {
    /// Runtime with default settings and the unbounded allocator.
    pub fn new() -> Result<Self, RuntimeError> {
        Self::with_config(RuntimeConfig::default())
    }

    /// Runtime using `config`; a `memory_limit` selects the limited allocator.
    pub fn with_config(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let allocator: Box<dyn Allocator> = match config.memory_limit {
            Some(limit) => Box::new(LimitedAllocator::new(limit)),
            None => Box::new(UnboundedAllocator::new()),
        };
        Self::with_allocator(config, allocator)
    }

    /// Runtime charging every byte to `allocator`.
    pub fn with_allocator(config: RuntimeConfig, mut allocator: Box<dyn Allocator>) -> Result<Self, RuntimeError> {
        config
            .validate()
            .map_err(|e| RuntimeError::message(format!("invalid runtime config: {e}")))?;
        let base = size_of::<Runtime>();
        if !allocator.resize(0, base) {
            return Err(RuntimeError::Memory);
        }
        let mut rt = Runtime {
            heap: Heap::new(),
            strings: StringTable::new(),
            gc: Collector::new(config.gc_pause, config.gc_step_mul.max(1), base),
            allocator,
            seed: 0,
            config,
            registry: GcRef::DANGLING,
            main_thread: GcRef::DANGLING,
            current: GcRef::DANGLING,
            type_metatables: [None; NUM_VALUE_KINDS],
            tm_names: Vec::new(),
            memerrmsg: None,
            panic: None,
            executor: None,
            protected: 0,
            unusable: false,
            built: false,
            closing: false,
            closed: false,
        };
        rt.seed = rt.config.seed.unwrap_or_else(|| make_seed(&rt as *const Runtime as usize));
        // a failed construction is torn down by Drop
        rt.open()?;
        debug!(target: "lume::state", seed = rt.seed, total = rt.total_bytes(), "open");
        Ok(rt)
    }

    fn open(&mut self) -> Result<(), RuntimeError> {
        let main = self.alloc_object(Tag::THREAD, ObjectBody::Thread(Box::new(LuaThread::unbuilt())))?;
        // the main thread lives outside the collector lists
        self.gc.allgc = self.heap.header(main).next;
        self.heap.header_mut(main).next = None;
        self.main_thread = main;
        self.current = main;
        self.build_thread_stack(main)?;
        self.heap.thread_mut(main).status = super::ThreadStatus::Running;
        let registry = self.alloc_object(Tag::TABLE, ObjectBody::Table(Table::new()))?;
        self.registry = registry;
        self.resize_table(registry, 2, 0)?;
        let globals = self.alloc_object(Tag::TABLE, ObjectBody::Table(Table::new()))?;
        self.heap
            .with_table_mut(registry, |t, heap| {
                t.set_int(heap, REGISTRY_MAIN_THREAD, Value::Thread(main));
                t.set_int(heap, REGISTRY_GLOBALS, Value::Table(globals));
            });
        self.init_fixed_strings()?;
        self.gc.running = true;
        self.built = true;
        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn allocator(&self) -> &dyn Allocator {
        self.allocator.as_ref()
    }

    /// Interned strings and bucket count of the interner.
    pub fn interner_stats(&self) -> (usize, usize) {
        (self.strings.len(), self.strings.size())
    }

    pub fn registry(&self) -> GcRef {
        self.registry
    }

    pub fn globals(&self) -> GcRef {
        match self.heap.table(self.registry).get_int(&self.heap, REGISTRY_GLOBALS) {
            Value::Table(t) => t,
            other => panic!("registry globals slot holds a {} value", other.type_name()),
        }
    }

    pub fn main_thread(&self) -> ThreadRef {
        self.main_thread
    }

    pub fn current_thread(&self) -> ThreadRef {
        self.current
    }

    /// Pre-interned message used for out-of-memory errors.
    pub fn memory_error_message(&self) -> Option<StrRef> {
        self.memerrmsg
    }

    pub fn is_unusable(&self) -> bool {
        self.unusable
    }

    /// Installs the handler for errors escaping every protected call,
    /// returning the previous one.
    pub fn set_panic_handler(&mut self, handler: Option<PanicHandler>) -> Option<PanicHandler> {
        std::mem::replace(&mut self.panic, handler)
    }

    /// Installs the interpreter that runs bytecode closures.
    pub fn set_executor(&mut self, executor: Rc<dyn Executor>) -> Option<Rc<dyn Executor>> {
        self.executor.replace(executor)
    }

    /// Reports an unprotected error and poisons the runtime.
    pub(crate) fn raise_panic(&mut self, err: &RuntimeError) {
        error!(target: "lume::state", error = %err, "unprotected error");
        self.unusable = true;
        if let Some(handler) = self.panic.as_mut() {
            handler(err);
        }
    }

    #[inline]
    pub(crate) fn ensure_usable(&self) -> Result<(), RuntimeError> {
        if self.unusable { Err(RuntimeError::Unusable) } else { Ok(()) }
    }

    // accounting

    /// Asks the allocator to move a block from `old` to `new` bytes. A
    /// refused growth triggers one emergency collection and a retry.
    pub(crate) fn charge(&mut self, old: usize, new: usize) -> Result<(), RuntimeError> {
        if !self.allocator.resize(old, new) {
            if !self.built || self.gc.kind != crate::gc::GcKind::Normal {
                return Err(RuntimeError::Memory);
            }
            debug!(target: "lume::alloc", old, new, "emergency_collect");
            self.full_collect(true)?;
            if !self.allocator.resize(old, new) {
                return Err(RuntimeError::Memory);
            }
        }
        self.gc.debt += new as isize - old as isize;
        Ok(())
    }

    pub(crate) fn release(&mut self, size: usize) {
        self.allocator.resize(size, 0);
        self.gc.debt -= size as isize;
    }

    /// Charges for `body` and links the new object at the head of allgc.
    pub(crate) fn alloc_object(&mut self, tag: Tag, body: ObjectBody) -> Result<GcRef, RuntimeError> {
        let size = body.footprint();
        self.charge(0, size)?;
        Ok(self.link_object(tag, body, size))
    }

    /// Links an object whose `size` bytes were already charged. Nothing
    /// between the charge and this call may allocate.
    pub(crate) fn link_object(&mut self, tag: Tag, body: ObjectBody, size: usize) -> GcRef {
        let header = GcHeader {
            next: self.gc.allgc,
            marked: Marked::from_bits(self.gc.current_white),
            tag,
        };
        let r = self.heap.insert(header, body, size);
        self.gc.allgc = Some(r);
        trace!(target: "lume::alloc", object = ?r, %tag, size, "alloc");
        r
    }

    /// Moves the newest object from allgc to the never-collected list.
    pub(crate) fn fix_object(&mut self, r: GcRef) {
        debug_assert_eq!(self.gc.allgc, Some(r), "only the newest object can be fixed");
        let fixed = self.gc.fixedgc;
        let header = self.heap.header_mut(r);
        // gray forever
        header.marked.white_to_gray();
        self.gc.allgc = header.next;
        header.next = fixed;
        self.gc.fixedgc = Some(r);
    }

    /// Debug check that `v` does not reference a freed or dead object, or
    /// one whose kind disagrees with the value's tag.
    #[inline]
    pub(crate) fn check_liveness(&self, v: &Value) {
        if cfg!(debug_assertions)
            && let Some(r) = v.gc_ref()
        {
            let header = self.heap.headers().try_get(r);
            assert!(header.is_some(), "value {v:?} refers to a freed object");
            if let Some(h) = header {
                assert_eq!(h.tag, v.tag(), "value tag disagrees with its object");
                assert!(!h.marked.is_dead(self.gc.other_white()), "value {v:?} refers to a dead object");
            }
        }
    }

    /// Metatable governing `v`: its own for tables and userdata, the
    /// per-kind one otherwise.
    pub fn metatable_of(&self, v: &Value) -> Option<GcRef> {
        match v {
            Value::Table(t) => self.heap.table(*t).metatable,
            Value::Userdata(u) => self.heap.userdata(*u).metatable,
            other => self.type_metatables[other.base_kind() as usize],
        }
    }

    // shutdown

    /// Runs pending finalizers and frees every object. Finalizer errors are
    /// logged and ignored.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.closing = true;
        if self.built {
            let main = self.main_thread;
            self.current = main;
            self.close_upvalues(main, 0);
            self.separate_tobefnz(true);
            // errors are only logged while closing
            let _ = self.call_all_pending_finalizers(false);
        }
        self.gc.current_white = Marked::WHITE_BITS;
        self.gc.kind = crate::gc::GcKind::Normal;
        self.sweep_whole_list(crate::gc::GcList::FinObj);
        self.sweep_whole_list(crate::gc::GcList::AllGc);
        self.sweep_whole_list(crate::gc::GcList::FixedGc);
        if self.heap.contains(self.main_thread)
            && let Some((_, _, size)) = self.heap.remove(self.main_thread)
        {
            self.release(size);
        }
        let buckets = StringTable::footprint_for(self.strings.size());
        self.release(buckets);
        self.allocator.resize(size_of::<Runtime>(), 0);
        debug!(
            target: "lume::state",
            live = self.heap.live_objects(),
            in_use = self.allocator.in_use(),
            "close"
        );
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
