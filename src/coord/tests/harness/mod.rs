// Copyright Rill contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE file at the
// root of this repository, or online at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Programmable fakes for the coordinator's collaborators.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use rill_cluster_client::{ClusterService, MemberInfo, MembersView};
use rill_coord::service::{
    CoordinationService, JobStore, PlanBuilder, SnapshotContext, SnapshotValidator,
};
use rill_coord::{CoordMetrics, JobExecutionRecord, JobRecord, MasterContext, Services};
use rill_dataflow_types::{
    Dag, Edge, ExecutionId, ExecutionPlan, JobConfig, JobError, JobId, JobOperation, JobResponse,
    ParticipantClient, ProcessorSpec, RawJobMetrics, TerminationMode, Vertex,
};
use rill_ore::now::now_zero;

/// How a fake participant answers `StartExecution`.
#[derive(Debug, Clone)]
pub enum StartBehavior {
    /// Reply immediately.
    Immediate(JobResponse),
    /// Reply once the participant receives `TerminateExecution`.
    OnTerminate(JobResponse),
    /// Reply once the terminal snapshot has begun.
    OnTerminalSnapshot(JobResponse),
    /// Never reply: the participant keeps running.
    Never,
}

/// The membership service fake.
#[derive(Debug)]
pub struct FakeCluster {
    pub view: Mutex<MembersView>,
    pub quorum_present: AtomicBool,
    pub safe_to_start: AtomicBool,
    pub local: MemberInfo,
}

impl ClusterService for FakeCluster {
    fn members_view(&self) -> MembersView {
        self.view.lock().unwrap().clone()
    }

    fn is_quorum_present(&self, _quorum_size: usize) -> bool {
        self.quorum_present.load(Ordering::SeqCst)
    }

    fn should_start_jobs(&self) -> bool {
        self.safe_to_start.load(Ordering::SeqCst)
    }

    fn local_member(&self) -> MemberInfo {
        self.local.clone()
    }
}

/// The participant transport fake: per-member, per-operation programmable
/// responses.
#[derive(Debug)]
pub struct FakeParticipants {
    pub init: Mutex<BTreeMap<Uuid, JobResponse>>,
    pub start: Mutex<BTreeMap<Uuid, StartBehavior>>,
    pub metrics: Mutex<BTreeMap<Uuid, JobResponse>>,
    /// Every `TerminateExecution` received, as (member, mode).
    pub terminates: Mutex<Vec<(Uuid, Option<TerminationMode>)>>,
    pub init_count: AtomicUsize,
    terminate_notify: Mutex<BTreeMap<Uuid, Arc<Notify>>>,
    snapshot_begun: watch::Receiver<bool>,
}

impl FakeParticipants {
    fn new(snapshot_begun: watch::Receiver<bool>) -> Self {
        FakeParticipants {
            init: Mutex::new(BTreeMap::new()),
            start: Mutex::new(BTreeMap::new()),
            metrics: Mutex::new(BTreeMap::new()),
            terminates: Mutex::new(Vec::new()),
            init_count: AtomicUsize::new(0),
            terminate_notify: Mutex::new(BTreeMap::new()),
            snapshot_begun,
        }
    }

    fn notify_for(&self, uuid: Uuid) -> Arc<Notify> {
        Arc::clone(
            self.terminate_notify
                .lock()
                .unwrap()
                .entry(uuid)
                .or_default(),
        )
    }

    /// The metrics batch a participant replies with by default.
    pub fn default_start_metrics() -> RawJobMetrics {
        RawJobMetrics::new(7, vec![("items".into(), 10)])
    }
}

#[async_trait]
impl ParticipantClient for FakeParticipants {
    async fn invoke(&self, member: &MemberInfo, op: JobOperation) -> JobResponse {
        match op {
            JobOperation::InitExecution { .. } => {
                self.init_count.fetch_add(1, Ordering::SeqCst);
                self.init
                    .lock()
                    .unwrap()
                    .get(&member.uuid)
                    .cloned()
                    .unwrap_or(JobResponse::Ok)
            }
            JobOperation::StartExecution { .. } => {
                let behavior = self
                    .start
                    .lock()
                    .unwrap()
                    .get(&member.uuid)
                    .cloned()
                    .unwrap_or(StartBehavior::Immediate(JobResponse::Done {
                        metrics: Self::default_start_metrics(),
                        failure: None,
                    }));
                match behavior {
                    StartBehavior::Immediate(response) => response,
                    StartBehavior::OnTerminate(response) => {
                        self.notify_for(member.uuid).notified().await;
                        response
                    }
                    StartBehavior::OnTerminalSnapshot(response) => {
                        let mut begun = self.snapshot_begun.clone();
                        let _ = begun.wait_for(|b| *b).await;
                        response
                    }
                    StartBehavior::Never => futures::future::pending().await,
                }
            }
            JobOperation::TerminateExecution { mode, .. } => {
                self.terminates.lock().unwrap().push((member.uuid, mode));
                self.notify_for(member.uuid).notify_one();
                JobResponse::Ok
            }
            JobOperation::GetLocalMetrics { .. } => self
                .metrics
                .lock()
                .unwrap()
                .get(&member.uuid)
                .cloned()
                .unwrap_or(JobResponse::Metrics(RawJobMetrics::default())),
        }
    }
}

/// The coordination-service fake: records every call.
#[derive(Debug, Default)]
pub struct FakeCoordination {
    pub scheduled_restarts: Mutex<Vec<JobId>>,
    pub restarted: Mutex<Vec<JobId>>,
    pub completed: Mutex<Vec<(JobId, Option<JobError>)>>,
    pub snapshots_scheduled: Mutex<Vec<(JobId, ExecutionId)>>,
    pub fail_complete_job: AtomicBool,
}

#[async_trait]
impl CoordinationService for FakeCoordination {
    fn schedule_restart(&self, job_id: JobId) {
        self.scheduled_restarts.lock().unwrap().push(job_id);
    }

    fn restart_job(&self, job_id: JobId) {
        self.restarted.lock().unwrap().push(job_id);
    }

    async fn complete_job(
        &self,
        job_id: JobId,
        _completion_time: u64,
        failure: Option<JobError>,
    ) -> Result<(), JobError> {
        if self.fail_complete_job.load(Ordering::SeqCst) {
            return Err(JobError::IllegalState("job records unavailable".into()));
        }
        self.completed.lock().unwrap().push((job_id, failure));
        Ok(())
    }

    fn schedule_snapshots(&self, job_id: JobId, execution_id: ExecutionId) {
        self.snapshots_scheduled
            .lock()
            .unwrap()
            .push((job_id, execution_id));
    }
}

/// The job-store fake: records every execution-record write.
#[derive(Debug, Default)]
pub struct FakeJobStore {
    pub writes: Mutex<Vec<(JobExecutionRecord, bool)>>,
}

impl JobStore for FakeJobStore {
    fn write_job_execution_record(
        &self,
        _job_id: JobId,
        record: &JobExecutionRecord,
        can_create: bool,
    ) {
        self.writes.lock().unwrap().push((record.clone(), can_create));
    }
}

/// The snapshot-context fake. Beginning a snapshot flips the shared
/// `begun` flag (observed by [`StartBehavior::OnTerminalSnapshot`]
/// participants) and, unless configured otherwise, completes the terminal
/// snapshot future immediately.
#[derive(Debug)]
pub struct FakeSnapshots {
    pub enqueued: Mutex<Vec<(Option<String>, bool)>>,
    pub begin_count: AtomicUsize,
    pub started_executions: Mutex<Vec<ExecutionId>>,
    pub terminated_count: AtomicUsize,
    pub complete_terminal_on_begin: AtomicBool,
    terminal: rill_ore::future::Completion<()>,
    begun: watch::Sender<bool>,
}

impl SnapshotContext for FakeSnapshots {
    fn on_execution_started(&self, execution_id: ExecutionId) {
        self.started_executions.lock().unwrap().push(execution_id);
    }

    fn on_execution_terminated(&self) {
        self.terminated_count.fetch_add(1, Ordering::SeqCst);
    }

    fn enqueue_snapshot(&self, name: Option<&str>, terminal: bool) {
        self.enqueued
            .lock()
            .unwrap()
            .push((name.map(String::from), terminal));
    }

    fn try_begin_snapshot(&self) {
        self.begin_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.begun.send(true);
        if self.complete_terminal_on_begin.load(Ordering::SeqCst) {
            self.terminal.complete(());
        }
    }

    fn terminal_snapshot_future(&self) -> rill_ore::future::Completion<()> {
        self.terminal.clone()
    }
}

/// The snapshot-validator fake.
#[derive(Debug)]
pub struct FakeValidator {
    pub result: Mutex<Result<i64, JobError>>,
}

impl SnapshotValidator for FakeValidator {
    fn validate(
        &self,
        snapshot_id: i64,
        _map_name: &str,
        _job_id_string: &str,
        _snapshot_name: Option<&str>,
    ) -> Result<i64, JobError> {
        match &*self.result.lock().unwrap() {
            Ok(id) if *id < 0 => Ok(snapshot_id),
            other => other.clone(),
        }
    }
}

/// The plan-builder fake: one empty plan per member of the view.
#[derive(Debug, Default)]
pub struct FakePlanBuilder {
    pub fail_with: Mutex<Option<JobError>>,
    /// The DAG of every build call, for inspecting restore splices.
    pub built_dags: Mutex<Vec<Dag>>,
    pub completed_vertices: Mutex<Vec<(String, Option<JobError>)>>,
}

impl PlanBuilder for FakePlanBuilder {
    fn build(
        &self,
        members_view: &MembersView,
        dag: &Dag,
        _job_id: JobId,
        _execution_id: ExecutionId,
        _config: &JobConfig,
        _ongoing_snapshot_id: i64,
    ) -> Result<BTreeMap<MemberInfo, ExecutionPlan>, JobError> {
        if let Some(failure) = self.fail_with.lock().unwrap().clone() {
            return Err(failure);
        }
        self.built_dags.lock().unwrap().push(dag.clone());
        Ok(members_view
            .members
            .iter()
            .map(|m| (m.clone(), ExecutionPlan::from_bytes(vec![1])))
            .collect())
    }

    fn complete_vertex(
        &self,
        vertex: &Vertex,
        failure: Option<&JobError>,
    ) -> Result<(), JobError> {
        self.completed_vertices
            .lock()
            .unwrap()
            .push((vertex.name.clone(), failure.cloned()));
        Ok(())
    }
}

/// A coordinator wired to fakes, plus the fakes themselves.
pub struct TestCoord {
    pub mc: Arc<MasterContext>,
    pub members: Vec<MemberInfo>,
    pub cluster: Arc<FakeCluster>,
    pub participants: Arc<FakeParticipants>,
    pub coordination: Arc<FakeCoordination>,
    pub job_store: Arc<FakeJobStore>,
    pub snapshots: Arc<FakeSnapshots>,
    pub plan_builder: Arc<FakePlanBuilder>,
    next_execution_id: Arc<AtomicU64>,
}

/// A deterministic member identity.
pub fn member(n: u8) -> MemberInfo {
    MemberInfo::new(Uuid::from_u128(n as u128), format!("10.0.0.{n}:5701"))
}

/// A two-vertex DAG, serialized the way the job store holds it.
pub fn serialized_test_dag() -> Vec<u8> {
    let mut dag = Dag::new();
    dag.vertex(Vertex::new("src", ProcessorSpec::Custom("gen".into())))
        .unwrap();
    dag.vertex(Vertex::new("sink", ProcessorSpec::Custom("log".into())))
        .unwrap();
    dag.edge(Edge::between("src", "sink")).unwrap();
    serde_json::to_vec(&dag).unwrap()
}

impl TestCoord {
    /// Builds a coordinator for a job over `member_count` members.
    pub fn new(member_count: u8, config: JobConfig) -> TestCoord {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let members: Vec<MemberInfo> = (1..=member_count).map(member).collect();
        let (begun_tx, begun_rx) = watch::channel(false);

        let cluster = Arc::new(FakeCluster {
            view: Mutex::new(MembersView::new(1, members.clone())),
            quorum_present: AtomicBool::new(true),
            safe_to_start: AtomicBool::new(true),
            local: member(0),
        });
        let participants = Arc::new(FakeParticipants::new(begun_rx));
        let coordination = Arc::new(FakeCoordination::default());
        let job_store = Arc::new(FakeJobStore::default());
        let snapshots = Arc::new(FakeSnapshots {
            enqueued: Mutex::new(Vec::new()),
            begin_count: AtomicUsize::new(0),
            started_executions: Mutex::new(Vec::new()),
            terminated_count: AtomicUsize::new(0),
            complete_terminal_on_begin: AtomicBool::new(true),
            terminal: rill_ore::future::Completion::new(),
            begun: begun_tx,
        });
        let plan_builder = Arc::new(FakePlanBuilder::default());
        let validator = Arc::new(FakeValidator {
            result: Mutex::new(Ok(-1)),
        });

        let services = Services {
            cluster: Arc::clone(&cluster) as _,
            participants: Arc::clone(&participants) as _,
            coordination: Arc::clone(&coordination) as _,
            job_store: Arc::clone(&job_store) as _,
            snapshots: Arc::clone(&snapshots) as _,
            snapshot_validator: validator as _,
            plan_builder: Arc::clone(&plan_builder) as _,
        };
        let job_record = JobRecord {
            job_id: JobId(1),
            serialized_dag: serialized_test_dag(),
            config,
            creation_time: 0,
        };
        let metrics = CoordMetrics::register(&prometheus::Registry::new()).unwrap();
        let mc = MasterContext::new(
            job_record,
            JobExecutionRecord::new(1),
            services,
            now_zero(),
            metrics,
        );
        TestCoord {
            mc,
            members,
            cluster,
            participants,
            coordination,
            job_store,
            snapshots,
            plan_builder,
            next_execution_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// An execution-id generator producing strictly increasing ids.
    pub fn id_gen(&self) -> impl Fn() -> ExecutionId {
        let counter = Arc::clone(&self.next_execution_id);
        move || ExecutionId(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Starts the job.
    pub fn start_job(&self) {
        let id_gen = self.id_gen();
        self.mc.try_start_job(&id_gen);
    }

    /// Configures every member's `StartExecution` behavior.
    pub fn set_start_behavior_all(&self, behavior: StartBehavior) {
        let mut start = self.participants.start.lock().unwrap();
        for m in &self.members {
            start.insert(m.uuid, behavior.clone());
        }
    }

    /// Configures one member's `StartExecution` behavior.
    pub fn set_start_behavior(&self, member: &MemberInfo, behavior: StartBehavior) {
        self.participants
            .start
            .lock()
            .unwrap()
            .insert(member.uuid, behavior);
    }
}

/// Polls `cond` until it holds, advancing (virtual) time in between.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}
