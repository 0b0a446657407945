use crate::domain::model::{CommandOutput, CommandPriority};
use crate::domain::ports::CommandRunner;
use crate::utils::error::Result;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

pub const DEFAULT_MAX_CONCURRENT_COMMANDS: usize = 6;

type Ticket = (CommandPriority, u64);

#[derive(Debug, Default)]
struct BusState {
    active: usize,
    queue: BinaryHeap<Reverse<Ticket>>,
    next_seq: u64,
    completed: u64,
    failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    pub active: usize,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Bounded executor for backend commands. Waiting commands are admitted by
/// priority, then in arrival order.
pub struct CommandBus<R: CommandRunner> {
    runner: R,
    max_concurrent: usize,
    state: Mutex<BusState>,
    notify: Notify,
}

impl<R: CommandRunner> CommandBus<R> {
    pub fn new(runner: R, max_concurrent: usize) -> Self {
        Self {
            runner,
            max_concurrent: max_concurrent.max(1),
            state: Mutex::new(BusState::default()),
            notify: Notify::new(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub async fn execute(
        &self,
        program: &str,
        args: &[String],
        priority: CommandPriority,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let slot = self.acquire(priority).await;

        let result = self.runner.run(program, args, timeout).await;

        {
            let mut state = self.lock();
            match &result {
                Ok(output) if output.success() => state.completed += 1,
                _ => state.failed += 1,
            }
        }

        drop(slot);
        result
    }

    pub fn stats(&self) -> BusStats {
        let state = self.lock();
        BusStats {
            active: state.active,
            queued: state.queue.len(),
            completed: state.completed,
            failed: state.failed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn acquire(&self, priority: CommandPriority) -> Slot<'_, R> {
        let ticket = {
            let mut state = self.lock();
            let ticket = (priority, state.next_seq);
            state.next_seq += 1;
            state.queue.push(Reverse(ticket));
            ticket
        };

        let mut waiter = Waiter {
            bus: self,
            ticket,
            admitted: false,
        };

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_admit(ticket) {
                waiter.admitted = true;
                // The next waiter in line may fit as well.
                self.notify.notify_waiters();
                break;
            }

            notified.await;
        }

        Slot { bus: self }
    }

    fn try_admit(&self, ticket: Ticket) -> bool {
        let mut state = self.lock();
        let is_head = state.queue.peek() == Some(&Reverse(ticket));
        if is_head && state.active < self.max_concurrent {
            state.queue.pop();
            state.active += 1;
            true
        } else {
            false
        }
    }
}

/// Removes a cancelled waiter from the queue.
struct Waiter<'a, R: CommandRunner> {
    bus: &'a CommandBus<R>,
    ticket: Ticket,
    admitted: bool,
}

impl<R: CommandRunner> Drop for Waiter<'_, R> {
    fn drop(&mut self) {
        if !self.admitted {
            let ticket = self.ticket;
            self.bus
                .lock()
                .queue
                .retain(|queued| *queued != Reverse(ticket));
            self.bus.notify.notify_waiters();
        }
    }
}

struct Slot<'a, R: CommandRunner> {
    bus: &'a CommandBus<R>,
}

impl<R: CommandRunner> Drop for Slot<'_, R> {
    fn drop(&mut self) {
        {
            let mut state = self.bus.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.bus.notify.notify_waiters();
    }
}
