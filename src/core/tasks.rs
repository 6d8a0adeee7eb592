//! Scheduled Task Queue
//!
//! Deferred work is expressed as entries carrying a due time and a
//! continuation value. The owner polls the queue once per tick and handles
//! whatever comes due; cancelling is removing the entry.

/// Handle for cancelling a scheduled entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

#[derive(Debug, Clone)]
struct Entry<T> {
    id: TaskId,
    due: f32,
    every: Option<f32>,
    task: T,
}

/// Time-ordered continuations, polled by their owner.
#[derive(Debug, Clone)]
pub struct TaskQueue<T> {
    entries: Vec<Entry<T>>,
    next_id: u64,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T: Clone> TaskQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once at time `due`.
    pub fn schedule(&mut self, due: f32, task: T) -> TaskId {
        self.push(due, None, task)
    }

    /// Run `task` at `due` and then every `every` seconds until cancelled.
    ///
    /// A non-positive period degrades to a one-shot entry.
    pub fn schedule_repeating(&mut self, due: f32, every: f32, task: T) -> TaskId {
        let every = (every > 0.0).then_some(every);
        self.push(due, every, task)
    }

    fn push(&mut self, due: f32, every: Option<f32>, task: T) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            due,
            every,
            task,
        });
        id
    }

    /// Remove an entry. Returns false if it already ran or was cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// True while the entry is pending.
    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every continuation due at or before `now`, earliest first.
    ///
    /// Repeating entries fire at most once per poll; missed periods are
    /// skipped rather than replayed.
    pub fn poll(&mut self, now: f32) -> Vec<T> {
        let mut due: Vec<(f32, TaskId, T)> = Vec::new();

        self.entries.retain_mut(|entry| {
            if entry.due > now {
                return true;
            }
            due.push((entry.due, entry.id, entry.task.clone()));
            match entry.every {
                Some(every) => {
                    while entry.due <= now {
                        entry.due += every;
                    }
                    true
                }
                None => false,
            }
        });

        due.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        due.into_iter().map(|(_, _, task)| task).collect()
    }
}
