// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use std::string::String;

/// A system that can be advanced in steps by the test harness.
pub trait Testable {
    /// Advance by one step, where step is system-defined.
    fn advance(&mut self);
}

pub type TestInspector<S> = fn(&mut S) -> TestStatus;

/// Advance the system until the inspector reports a result, panicking
/// on failure or once `max_steps` steps elapsed without one.
pub fn run_test<S: Testable>(system: &mut S, max_steps: usize, inspector: TestInspector<S>) {
    for _ in 0..max_steps {
        system.advance();
        match (inspector)(system) {
            TestStatus::Running => continue,
            TestStatus::Success => return,
            TestStatus::Failed => panic!("Test failed!"),
            TestStatus::FailedAt(msg) => panic!("Test failed: {msg}!"),
        }
    }
    panic!("Test timed out!")
}

#[derive(Debug, PartialEq)]
pub enum TestStatus {
    Running,
    Success,
    Failed,
    FailedAt(String),
}
