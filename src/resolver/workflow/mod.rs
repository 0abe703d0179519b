use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::context::{ResolverContext, SessionRun};
use super::events::{EventSender, PipelineEvent, Stage};
use super::{fix, outlet, query, research, web_crawl};
use crate::config::Config;
use crate::llm::client::LLMClient;
use crate::session::Session;
use crate::types::{ErrorReport, FixReport};

/// 时间跟踪作用域
pub struct TimingScope {
    start_time: Instant,
    phase_start_times: Vec<(Stage, Instant)>,
    phase_durations: Vec<(Stage, Duration)>,
}

impl Default for TimingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingScope {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            phase_start_times: Vec::new(),
            phase_durations: Vec::new(),
        }
    }

    /// 开始一个新的阶段计时
    pub fn start_phase(&mut self, stage: Stage) {
        self.phase_start_times.retain(|(s, _)| *s != stage);
        self.phase_start_times.push((stage, Instant::now()));
    }

    /// 结束一个阶段的计时
    pub fn end_phase(&mut self, stage: Stage) -> Option<Duration> {
        let index = self.phase_start_times.iter().position(|(s, _)| *s == stage)?;
        let (_, start) = self.phase_start_times.remove(index);
        let duration = start.elapsed();
        self.phase_durations.push((stage, duration));
        Some(duration)
    }

    pub fn get_total_duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 已结束的阶段，按结束顺序
    pub fn completed_phases(&self) -> Vec<Stage> {
        self.phase_durations.iter().map(|(s, _)| *s).collect()
    }

    /// 获取格式化的执行时间报告
    pub fn generate_timing_report(&self) -> String {
        let mut report = format!(
            "总执行时间: {:.2}秒\n",
            self.get_total_duration().as_secs_f64()
        );
        if !self.phase_durations.is_empty() {
            report.push_str("\n各阶段执行时间:\n");
            for (stage, duration) in &self.phase_durations {
                report.push_str(&format!("- {}: {:.3}秒\n", stage, duration.as_secs_f64()));
            }
        }
        report
    }
}

/// 一次求解请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveRequest {
    #[serde(flatten)]
    pub report: ErrorReport,
    /// 续接已有会话；为空时新建
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ResolveRequest {
    pub fn new(report: ErrorReport) -> Self {
        Self {
            report,
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id.filter(|id| !id.trim().is_empty());
        self
    }
}

/// 四阶段流水线：query → research → crawl → fix
#[derive(Clone)]
pub struct Resolver {
    context: ResolverContext,
}

impl Resolver {
    pub fn new(context: ResolverContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ResolverContext {
        &self.context
    }

    pub async fn run(&self, request: ResolveRequest, sink: Option<EventSender>) -> Result<FixReport> {
        let session = self.open_session(request.session_id.as_deref()).await?;
        tracing::info!("🚀 开始求解，会话: {}", session.id);
        let run = SessionRun::new(&self.context, session, sink);
        run.record("user", &request.report.to_prompt(), false).await;

        let mut timing = TimingScope::new();
        let result = self.drive(&run, &request.report, &mut timing).await;

        if let Err(e) = run.persist_state().await {
            tracing::warn!("⚠️ 保存会话状态失败: {}", e);
        }
        self.save_to_memory(&run).await;
        tracing::info!("\n{}", timing.generate_timing_report());

        result
    }

    async fn drive(
        &self,
        run: &SessionRun,
        report: &ErrorReport,
        timing: &mut TimingScope,
    ) -> Result<FixReport> {
        let context = &self.context;

        begin(run, timing, Stage::Query);
        let plan = query::execute(context, run, report).await?;
        end(run, timing, Stage::Query);

        begin(run, timing, Stage::Research);
        let urls = research::execute(context, run, &plan).await?;
        end(run, timing, Stage::Research);

        begin(run, timing, Stage::Crawl);
        let crawl = web_crawl::execute(context, run, &urls).await?;
        end(run, timing, Stage::Crawl);

        begin(run, timing, Stage::Fix);
        let outcome = fix::execute(context, run, report, &plan, &crawl.findings).await?;
        end(run, timing, Stage::Fix);

        let fix_report = FixReport {
            session_id: run.session.id.clone(),
            status: outcome.status,
            candidate: outcome.candidate,
            issues: outcome.issues,
            iterations: outcome.iterations,
            findings: crawl.findings,
            no_authoritative_source: !crawl.authoritative,
        };
        if !fix_report.is_verified() {
            run.warn(format!(
                "Verification cap of {} iteration(s) reached; returning best-effort result",
                fix_report.iterations
            ));
        }
        Ok(fix_report)
    }

    async fn open_session(&self, session_id: Option<&str>) -> Result<Session> {
        let config = &self.context.config;
        if let Some(id) = session_id {
            if let Some(session) = self
                .context
                .sessions
                .get_session(&config.app_name, &config.user_id, id)
                .await?
            {
                tracing::info!("♻️ 续接已有会话: {}", id);
                return Ok(session);
            }
        }
        self.context
            .sessions
            .create_session(&config.app_name, &config.user_id, session_id)
            .await
    }

    /// 会话写入长期记忆，失败只记录日志
    async fn save_to_memory(&self, run: &SessionRun) {
        let config = &self.context.config;
        let session = match self
            .context
            .sessions
            .get_session(&config.app_name, &config.user_id, &run.session.id)
            .await
        {
            Ok(Some(session)) => session,
            Ok(None) => run.session.clone(),
            Err(e) => {
                tracing::error!("❌ 读取会话失败，跳过记忆保存: {}", e);
                return;
            }
        };
        match self.context.memory_service.add_session_to_memory(&session).await {
            Ok(()) => tracing::info!("💾 会话已自动保存到长期记忆"),
            Err(e) => tracing::error!("❌ 会话自动保存到长期记忆失败: {}", e),
        }
    }
}

fn begin(run: &SessionRun, timing: &mut TimingScope, stage: Stage) {
    tracing::info!("▶️ 阶段开始: {}", stage);
    timing.start_phase(stage);
    run.emit(PipelineEvent::StageStarted { stage });
}

fn end(run: &SessionRun, timing: &mut TimingScope, stage: Stage) {
    let elapsed = timing.end_phase(stage).unwrap_or_default();
    tracing::info!("✅ 阶段完成: {} ({:.2}秒)", stage, elapsed.as_secs_f64());
    run.emit(PipelineEvent::StageCompleted {
        stage,
        elapsed_ms: elapsed.as_millis() as u64,
    });
}

/// 启动命令行求解流程
pub async fn launch(config: &Config, request: ResolveRequest) -> Result<FixReport> {
    let client = LLMClient::new(config)?;

    // 启动时检查模型连接
    client.check_connection().await?;

    let context = ResolverContext::with_runtime(config.clone(), Arc::new(client))?;
    let report = Resolver::new(context).run(request, None).await?;
    outlet::save(config, &report).await?;
    Ok(report)
}

#[cfg(test)]
mod tests;
