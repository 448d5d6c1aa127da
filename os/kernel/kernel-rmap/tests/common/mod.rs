//! A tiny simulated machine for end-to-end tests: a frame table, a software
//! page table, a process table and one [`MappingTracker`], wired together the
//! way the fault, fork and exit paths of a kernel would.

#![allow(dead_code)]

use kernel_rmap::{
    AddressSpaceId, AsidAllocator, FrameDirectory, FrameNumber, FrameTable, HardwarePageTable,
    MappingTracker, PageFlags, PhysicalAddress, Pid, ProcessTable, ReverseMapping, RmapConfig,
    SoftPageTable, TableConfig, TeardownReport, TranslateError, Translation, VirtualAddress,
    translate,
};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, Once};

/// First heap page handed out by [`Machine::grow`].
pub const HEAP_BASE: u64 = 0x0000_0000_4000_0000;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Process {
    pub pid: Pid,
    pub space: AddressSpaceId,
}

#[derive(Default)]
pub struct Processes {
    by_space: Mutex<BTreeMap<AddressSpaceId, Pid>>,
}

impl ProcessTable for Processes {
    fn lookup_by_space(&self, space: AddressSpaceId) -> Option<Pid> {
        self.by_space.lock().unwrap().get(&space).copied()
    }
}

pub struct Machine {
    pub frames: FrameTable,
    pub pages: SoftPageTable,
    pub procs: Processes,
    pub tracker: MappingTracker,
    asids: AsidAllocator,
    next_pid: AtomicU32,
    tick: AtomicU64,
    heap_top: Mutex<BTreeMap<AddressSpaceId, u64>>,
}

impl Machine {
    pub fn new(config: &RmapConfig) -> Self {
        Self {
            frames: FrameTable::new(config.max_frames),
            pages: SoftPageTable::new(),
            procs: Processes::default(),
            tracker: MappingTracker::new(config).unwrap(),
            asids: AsidAllocator::new(),
            next_pid: AtomicU32::new(1),
            tick: AtomicU64::new(0),
            heap_top: Mutex::new(BTreeMap::new()),
        }
    }

    /// A machine with small tables so tests stay fast.
    pub fn small() -> Self {
        Self::new(
            &RmapConfig::default()
                .with_ipt(TableConfig::new(64, 1024))
                .with_stlb(TableConfig::new(64, 1024))
                .with_max_frames(512),
        )
    }

    fn now(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    pub fn spawn(&self) -> Process {
        let proc = Process {
            pid: Pid(self.next_pid.fetch_add(1, Ordering::Relaxed)),
            space: self.asids.allocate().unwrap(),
        };
        self.procs.by_space.lock().unwrap().insert(proc.space, proc.pid);
        self.heap_top.lock().unwrap().insert(proc.space, HEAP_BASE);
        proc
    }

    /// Maps a fresh frame at `va` in `proc` with `flags`, as the fault path
    /// would. Returns the frame.
    pub fn map_fresh(&self, proc: &Process, va: VirtualAddress, flags: PageFlags) -> FrameNumber {
        let frame = self.frames.alloc(Some(proc.pid), self.now()).unwrap();
        self.pages.map(proc.space, va, frame, flags);
        self.tracker.on_map(proc.space, va, frame, flags);
        frame
    }

    /// Grows the heap of `proc` by `n` writable pages; returns their bases.
    pub fn grow(&self, proc: &Process, n: usize) -> Vec<VirtualAddress> {
        (0..n)
            .map(|_| {
                let va = {
                    let mut tops = self.heap_top.lock().unwrap();
                    let top = tops.get_mut(&proc.space).unwrap();
                    let va = VirtualAddress::new(*top);
                    *top += kernel_rmap::PAGE_SIZE;
                    va
                };
                self.map_fresh(proc, va, PageFlags::user_data());
                va
            })
            .collect()
    }

    /// Unmaps one page; frees its frame once nobody maps it any more.
    pub fn unmap(&self, proc: &Process, va: VirtualAddress) -> Option<FrameNumber> {
        let old = self.pages.unmap(proc.space, va)?;
        let frame = old.frame();
        self.tracker.on_unmap(proc.space, va, frame);
        if self.tracker.ipt().refcount_of(frame) == 0 {
            self.frames.free(frame).unwrap();
        }
        Some(frame)
    }

    /// Forks `parent`: every page is shared copy-on-write, both sides
    /// read-only.
    pub fn fork(&self, parent: &Process) -> Process {
        let child = self.spawn();
        let top = self.heap_top.lock().unwrap()[&parent.space];
        self.heap_top.lock().unwrap().insert(child.space, top);

        for (page, frame, flags) in self.pages.mappings_of(parent.space) {
            let va = page.base();
            let shared = flags.with_writable(false);
            if flags.writable() {
                self.pages.change_protection(parent.space, va, shared);
                self.tracker.on_protection_change(parent.space, va, frame, shared);
            }
            self.pages.map(child.space, va, frame, shared);
            self.tracker.on_map(child.space, va, frame, shared);
        }
        child
    }

    /// Tears `proc` down: page tables, shadow tables, then frames. Frames
    /// still mapped elsewhere stay allocated.
    pub fn exit(&self, proc: Process) -> TeardownReport {
        let leaves = self.pages.destroy(proc.space);
        let report = self.tracker.on_address_space_destroyed(proc.space);
        for (_, frame) in leaves {
            if self.tracker.ipt().refcount_of(frame) == 0 && self.frames.is_allocated(frame) {
                self.frames.free(frame).unwrap();
            }
        }
        self.procs.by_space.lock().unwrap().remove(&proc.space);
        self.heap_top.lock().unwrap().remove(&proc.space);
        report
    }

    pub fn translate(
        &self,
        proc: &Process,
        va: VirtualAddress,
    ) -> Result<Translation, TranslateError> {
        translate(&self.pages, proc.space, va)
    }

    pub fn translate_cached(
        &self,
        proc: &Process,
        va: VirtualAddress,
    ) -> Result<Translation, TranslateError> {
        self.tracker.translate_cached(&self.pages, proc.space, va)
    }

    pub fn reverse(&self, pa: PhysicalAddress, max: usize) -> Vec<ReverseMapping> {
        self.tracker.reverse_lookup(&self.procs, pa, max)
    }

    /// Every STLB entry of `proc` agrees with a fresh page-table walk.
    pub fn cache_agrees_with_walk(&self, proc: &Process, vas: &[VirtualAddress]) -> bool {
        vas.iter()
            .all(|&va| cache_agrees(&self.tracker, &self.pages, proc.space, va))
    }
}

/// The STLB entry for the page of `va`, if any, matches what `pages` maps
/// there right now.
pub fn cache_agrees(
    tracker: &MappingTracker,
    pages: &SoftPageTable,
    space: AddressSpaceId,
    va: VirtualAddress,
) -> bool {
    match tracker.stlb().lookup(space, va) {
        None => true,
        Some(hit) => pages.walk(space, va).is_some_and(|t| {
            t.physical.page_base() == hit.physical_page && t.flags == hit.flags
        }),
    }
}

/// `(pid, page)` pairs of a reverse lookup, sorted.
pub fn owners(mappings: &[ReverseMapping]) -> Vec<(Option<Pid>, VirtualAddress)> {
    let mut out: Vec<_> = mappings.iter().map(|m| (m.pid, m.page.base())).collect();
    out.sort();
    out
}

/// A `log::Log` sink that keeps every record for later inspection.
pub struct CaptureLogger {
    records: Mutex<Vec<(Level, String)>>,
}

static LOGGER: CaptureLogger = CaptureLogger {
    records: Mutex::new(Vec::new()),
};

impl CaptureLogger {
    /// Installs the capturing logger once per test binary.
    pub fn install() -> &'static Self {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            log::set_logger(&LOGGER).unwrap();
            log::set_max_level(LevelFilter::Trace);
        });
        &LOGGER
    }

    /// Whether any record at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }
}

impl Log for CaptureLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}
