//! Chrome trace output.
//!
//! Opt-in: nothing is recorded until `open` is called.  Passes are recorded
//! as scopes on track 0; each command gets an event on the track of the pool
//! slot it ran in, so the trace shows how well processes overlapped.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_complete(
        &mut self,
        name: &str,
        tid: usize,
        start: Instant,
        end: Instant,
    ) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            tid,
            name,
            start.duration_since(self.start).as_micros(),
            end.duration_since(start).as_micros(),
        )
    }

    fn close(&mut self) -> std::io::Result<()> {
        let start = self.start;
        self.write_complete("main", 0, start, Instant::now())?;
        writeln!(self.w, "\n]")?;
        self.w.flush()
    }
}

fn with_trace(f: impl FnOnce(&mut Trace) -> std::io::Result<()>) {
    let mut trace = match TRACE.lock() {
        Ok(trace) => trace,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(t) = trace.as_mut() {
        let ok = f(t).and_then(|_| writeln!(t.w, ","));
        if ok.is_err() {
            // Stop tracing rather than fail the build over a trace file.
            *trace = None;
        }
    }
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    *TRACE.lock().unwrap_or_else(|p| p.into_inner()) = Some(trace);
    Ok(())
}

pub fn enabled() -> bool {
    TRACE.lock().map(|t| t.is_some()).unwrap_or(false)
}

/// Run `f`, recording how long it took.
#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    let end = Instant::now();
    with_trace(|t| t.write_complete(name, 0, start, end));
    result
}

/// Record an already-finished span on track `tid`.
pub fn write_complete(name: &str, tid: usize, start: Instant, end: Instant) {
    with_trace(|t| t.write_complete(name, tid, start, end));
}

pub fn close() -> std::io::Result<()> {
    let mut trace = TRACE.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(mut t) = trace.take() {
        return t.close();
    }
    Ok(())
}
