use super::{check_relaunch, check_step_update, JobRepository};
use crate::domain::{JobExecution, JobInstance, StepExecution};
use crate::error::{BatchError, Result};
use crate::params::JobParameters;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    last_id: i64,
    instances: BTreeMap<i64, JobInstance>,
    /// Stored without step executions; those live in `steps`
    executions: BTreeMap<i64, JobExecution>,
    steps: BTreeMap<i64, StepExecution>,
    stop_requested: HashSet<i64>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn find_instance(&self, job_name: &str, job_key: &str) -> Option<JobInstance> {
        self.instances
            .values()
            .find(|i| i.job_name == job_name && i.job_key == job_key)
            .cloned()
    }

    fn create_instance(&mut self, job_name: &str, job_key: &str) -> JobInstance {
        let instance = JobInstance {
            id: self.next_id(),
            job_name: job_name.to_string(),
            job_key: job_key.to_string(),
        };
        self.instances.insert(instance.id, instance.clone());
        instance
    }

    fn create_execution(&mut self, instance: &JobInstance, parameters: &JobParameters) -> JobExecution {
        let execution = JobExecution::new(self.next_id(), instance.clone(), parameters.clone());
        self.executions.insert(execution.id, execution.clone());
        execution
    }

    fn with_steps(&self, execution: &JobExecution) -> JobExecution {
        let mut execution = execution.clone();
        execution.step_executions = self
            .steps
            .values()
            .filter(|s| s.job_execution_id == execution.id)
            .cloned()
            .collect();
        execution
    }

    fn executions_of(&self, instance_id: i64) -> Vec<JobExecution> {
        self.executions
            .values()
            .filter(|e| e.instance.id == instance_id)
            .map(|e| self.with_steps(e))
            .collect()
    }
}

/// Process-local [`JobRepository`]
#[derive(Default)]
pub struct InMemoryJobRepository {
    state: Mutex<State>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| BatchError::repository("in-memory repository lock poisoned"))
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find_instance(&self, job_name: &str, job_key: &str) -> Result<Option<JobInstance>> {
        Ok(self.lock()?.find_instance(job_name, job_key))
    }

    async fn find_or_create_instance(&self, job_name: &str, job_key: &str) -> Result<JobInstance> {
        let mut state = self.lock()?;
        match state.find_instance(job_name, job_key) {
            Some(instance) => Ok(instance),
            None => Ok(state.create_instance(job_name, job_key)),
        }
    }

    async fn last_instance(&self, job_name: &str) -> Result<Option<JobInstance>> {
        Ok(self
            .lock()?
            .instances
            .values()
            .rev()
            .find(|i| i.job_name == job_name)
            .cloned())
    }

    async fn last_execution(&self, instance_id: i64) -> Result<Option<JobExecution>> {
        Ok(self.lock()?.executions_of(instance_id).pop())
    }

    async fn find_executions(&self, instance_id: i64) -> Result<Vec<JobExecution>> {
        Ok(self.lock()?.executions_of(instance_id))
    }

    async fn create_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution> {
        let mut state = self.lock()?;
        if !state.instances.contains_key(&instance.id) {
            return Err(BatchError::repository(format!(
                "unknown job instance {}",
                instance.id
            )));
        }
        Ok(state.create_execution(instance, parameters))
    }

    async fn create_job_execution(
        &self,
        job_name: &str,
        job_key: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution> {
        let mut state = self.lock()?;
        let instance = match state.find_instance(job_name, job_key) {
            Some(instance) => {
                let history: Vec<_> = state
                    .executions
                    .values()
                    .filter(|e| e.instance.id == instance.id)
                    .map(|e| (e.id, e.status))
                    .collect();
                check_relaunch(&instance, &history, restartable)?;
                instance
            },
            None => state.create_instance(job_name, job_key),
        };
        Ok(state.create_execution(&instance, parameters))
    }

    async fn update_execution(&self, execution: &JobExecution) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .executions
            .get_mut(&execution.id)
            .ok_or(BatchError::NoSuchExecution(execution.id))?;
        stored.status.check_transition(execution.status)?;
        stored.status = execution.status;
        stored.exit_status = execution.exit_status.clone();
        stored.start_time = execution.start_time;
        stored.end_time = execution.end_time;
        stored.last_updated = execution.last_updated;
        Ok(())
    }

    async fn get_execution(&self, execution_id: i64) -> Result<Option<JobExecution>> {
        let state = self.lock()?;
        Ok(state
            .executions
            .get(&execution_id)
            .map(|e| state.with_steps(e)))
    }

    async fn add_step_execution(
        &self,
        job_execution_id: i64,
        step_name: &str,
    ) -> Result<StepExecution> {
        let mut state = self.lock()?;
        if !state.executions.contains_key(&job_execution_id) {
            return Err(BatchError::NoSuchExecution(job_execution_id));
        }
        let step = StepExecution::new(state.next_id(), job_execution_id, step_name);
        state.steps.insert(step.id, step.clone());
        Ok(step)
    }

    async fn update_step_execution(&self, step: &StepExecution) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state.steps.get_mut(&step.id).ok_or_else(|| {
            BatchError::repository(format!("unknown step execution {}", step.id))
        })?;
        check_step_update(stored, step)?;
        *stored = step.clone();
        Ok(())
    }

    async fn last_step_execution(
        &self,
        instance_id: i64,
        step_name: &str,
    ) -> Result<Option<StepExecution>> {
        let state = self.lock()?;
        let execution_ids: BTreeSet<i64> = state
            .executions
            .values()
            .filter(|e| e.instance.id == instance_id)
            .map(|e| e.id)
            .collect();
        Ok(state
            .steps
            .values()
            .rev()
            .find(|s| s.step_name == step_name && execution_ids.contains(&s.job_execution_id))
            .cloned())
    }

    async fn request_stop(&self, execution_id: i64) -> Result<()> {
        let mut state = self.lock()?;
        let execution = state
            .executions
            .get(&execution_id)
            .ok_or(BatchError::NoSuchExecution(execution_id))?;
        if !execution.is_running() {
            return Err(BatchError::JobExecutionNotRunning(execution_id));
        }
        state.stop_requested.insert(execution_id);
        Ok(())
    }

    async fn is_stop_requested(&self, execution_id: i64) -> Result<bool> {
        Ok(self.lock()?.stop_requested.contains(&execution_id))
    }

    async fn job_names(&self) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .lock()?
            .instances
            .values()
            .map(|i| i.job_name.clone())
            .collect();
        Ok(names.into_iter().collect())
    }
}
