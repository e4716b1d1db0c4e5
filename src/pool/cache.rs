use std::collections::{HashMap, VecDeque};

use crate::lifecycle::Job;

/// Recently finished jobs, oldest evicted first.
#[derive(Debug)]
pub(crate) struct CompletedCache {
    capacity: usize,
    order: VecDeque<String>,
    jobs: HashMap<String, Job>,
}

impl CompletedCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            jobs: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, job: Job) {
        let id = job.id.clone();
        if self.jobs.insert(id.clone(), job).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.jobs.remove(&oldest);
            }
        }
    }

    pub(crate) fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    pub(crate) fn remove(&mut self, job_id: &str) {
        if self.jobs.remove(job_id).is_some() {
            self.order.retain(|id| id != job_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }
}
