//! The ordering demonstration.
//!
//! Expected output, regardless of clock:
//!
//! ```text
//! Resolved 1
//! Rejected 2
//! setTimeout 1
//! setTimeout 2
//! 1610
//! error 100
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use pledge_core::Deferred;
use pledge_engine::LoopHandle;

/// Lines printed by the demo, optionally echoed to stdout as they arrive.
#[derive(Clone, Default)]
pub struct Transcript {
    lines: Rc<RefCell<Vec<String>>>,
    echo: bool,
}

impl Transcript {
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub fn line(&self, line: impl Into<String>) {
        let line = line.into();
        if self.echo {
            println!("{line}");
        }
        self.lines.borrow_mut().push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

/// Schedule the demo on `handle`. Output appears once the loop runs.
pub fn schedule(handle: &LoopHandle, out: &Transcript) {
    for label in ["setTimeout 1", "setTimeout 2"] {
        let out = out.clone();
        handle.set_timeout(Duration::ZERO, move || out.line(label));
    }

    let ten = Deferred::<i64, i64>::new(handle, |resolve, _reject| {
        handle.set_timeout(Duration::from_millis(1000), move || resolve(10));
    });
    let hundred = Deferred::<i64, i64>::new(handle, |_resolve, reject| {
        handle.set_timeout(Duration::from_millis(2000), move || reject(100));
    });

    let printed = out.clone();
    let failed = out.clone();
    ten.then(|n| Ok(n + 200))
        .then(|n| Ok(n + 400))
        .then(|n| Ok(n + 1000))
        .then(move |n| {
            printed.line(n.to_string());
            Ok(())
        })
        .catch(move |error| failed.line(format!("error {error}")));

    let printed = out.clone();
    let failed = out.clone();
    hundred.then_or_else(
        move |n| {
            printed.line(n.to_string());
            Ok(())
        },
        move |error| failed.line(format!("error {error}")),
    );

    let printed = out.clone();
    Deferred::<&str, &str>::resolved(handle, "1").then(move |value| {
        printed.line(format!("Resolved {value}"));
        Ok(())
    });
    let failed = out.clone();
    Deferred::<&str, &str>::rejected(handle, "2")
        .catch(move |error| failed.line(format!("Rejected {error}")));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pledge_engine::{EventLoop, LoopConfig};

    #[test]
    fn demo_prints_in_tier_order() {
        let mut event_loop = EventLoop::new(LoopConfig::virtual_time()).expect("event loop");
        let out = Transcript::default();
        schedule(&event_loop.handle(), &out);

        let report = event_loop.run().expect("run");
        insta::assert_snapshot!(out.lines().join("\n"), @r"
        Resolved 1
        Rejected 2
        setTimeout 1
        setTimeout 2
        1610
        error 100
        ");
        assert_eq!(report.timers_fired, 4);
        assert_eq!(report.elapsed, Duration::from_millis(2000));
        assert!(report.unhandled.is_empty());
    }

    #[test]
    fn nothing_prints_before_the_loop_runs() {
        let event_loop = EventLoop::new(LoopConfig::virtual_time()).expect("event loop");
        let out = Transcript::default();
        schedule(&event_loop.handle(), &out);
        assert!(out.lines().is_empty());
    }
}
