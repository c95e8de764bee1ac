//! Telescope operations seam
//!
//! The orchestrator drives the telescope only through [`TelescopeOps`], so the
//! same run logic works against a live [`TelescopeLink`] or a scripted fake.

use async_trait::async_trait;
use skyward_link::{LinkResult, TelescopeLink, ViewState};
use std::sync::Arc;

/// Operations the orchestrator needs from a telescope
#[async_trait]
pub trait TelescopeOps: Send + Sync {
    // =========================================================================
    // MOUNT OPERATIONS
    // =========================================================================

    /// Start a goto to J2000 coordinates (RA in hours, Dec in degrees)
    async fn goto(&self, ra_hours: f64, dec_deg: f64, name: &str) -> LinkResult<()>;

    async fn stop_slew(&self) -> LinkResult<()>;

    async fn park(&self) -> LinkResult<()>;

    // =========================================================================
    // IMAGING OPERATIONS
    // =========================================================================

    /// Start live stacking, discarding any previous stack when `restart` is set
    async fn start_imaging(&self, restart: bool) -> LinkResult<()>;

    async fn stop_imaging(&self) -> LinkResult<()>;

    async fn auto_focus(&self) -> LinkResult<()>;

    // =========================================================================
    // STATUS
    // =========================================================================

    /// Current per-stage progress
    async fn view_state(&self) -> LinkResult<ViewState>;
}

pub type SharedTelescopeOps = Arc<dyn TelescopeOps>;

#[async_trait]
impl TelescopeOps for TelescopeLink {
    async fn goto(&self, ra_hours: f64, dec_deg: f64, name: &str) -> LinkResult<()> {
        TelescopeLink::goto(self, ra_hours, dec_deg, name).await.map(|_| ())
    }

    async fn stop_slew(&self) -> LinkResult<()> {
        TelescopeLink::stop_slew(self).await.map(|_| ())
    }

    async fn park(&self) -> LinkResult<()> {
        TelescopeLink::park(self).await.map(|_| ())
    }

    async fn start_imaging(&self, restart: bool) -> LinkResult<()> {
        TelescopeLink::start_imaging(self, restart).await.map(|_| ())
    }

    async fn stop_imaging(&self) -> LinkResult<()> {
        TelescopeLink::stop_imaging(self).await.map(|_| ())
    }

    async fn auto_focus(&self) -> LinkResult<()> {
        TelescopeLink::auto_focus(self).await.map(|_| ())
    }

    async fn view_state(&self) -> LinkResult<ViewState> {
        self.get_view_state().await
    }
}

/// Scripted telescope for orchestrator tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use skyward_link::protocol::stages;
    use skyward_link::{LinkError, StageReport};
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        calls: Vec<String>,
        stage: Option<&'static str>,
        polls: u32,
    }

    /// Each goto/focus completes after `polls_to_complete` view-state polls.
    /// Stacking never completes; its frame count grows by one per poll.
    pub struct FakeTelescope {
        pub polls_to_complete: u32,
        pub failing_gotos: HashSet<String>,
        pub focus_fails: bool,
        pub goto_never_completes: bool,
        script: Mutex<Script>,
    }

    impl FakeTelescope {
        pub fn new() -> Self {
            Self {
                polls_to_complete: 2,
                failing_gotos: HashSet::new(),
                focus_fails: false,
                goto_never_completes: false,
                script: Mutex::new(Script::default()),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.script.lock().unwrap().calls.clone()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }

        fn record(&self, call: String, stage: Option<&'static str>) {
            let mut script = self.script.lock().unwrap();
            script.calls.push(call);
            if stage.is_some() {
                script.stage = stage;
                script.polls = 0;
            }
        }

        fn rejected(method: &str) -> LinkError {
            LinkError::CommandError {
                method: method.to_string(),
                code: 207,
                message: "fail to operate".to_string(),
            }
        }
    }

    #[async_trait]
    impl TelescopeOps for FakeTelescope {
        async fn goto(&self, _ra_hours: f64, _dec_deg: f64, name: &str) -> LinkResult<()> {
            self.record(format!("goto {}", name), None);
            if self.failing_gotos.contains(name) {
                return Err(Self::rejected("iscope_start_view"));
            }
            self.record("slewing".to_string(), Some(stages::AUTO_GOTO));
            Ok(())
        }

        async fn stop_slew(&self) -> LinkResult<()> {
            self.record("stop_slew".to_string(), None);
            Ok(())
        }

        async fn park(&self) -> LinkResult<()> {
            self.record("park".to_string(), None);
            Ok(())
        }

        async fn start_imaging(&self, restart: bool) -> LinkResult<()> {
            self.record(format!("start_imaging {}", restart), Some(stages::STACK));
            Ok(())
        }

        async fn stop_imaging(&self) -> LinkResult<()> {
            self.record("stop_imaging".to_string(), None);
            Ok(())
        }

        async fn auto_focus(&self) -> LinkResult<()> {
            self.record("auto_focus".to_string(), Some(stages::AUTO_FOCUS));
            Ok(())
        }

        async fn view_state(&self) -> LinkResult<ViewState> {
            let mut script = self.script.lock().unwrap();
            script.polls += 1;
            let polls = script.polls;
            let mut view = ViewState::default();
            let finished = polls >= self.polls_to_complete;

            match script.stage {
                Some(stages::AUTO_GOTO) => {
                    let state = if finished && !self.goto_never_completes {
                        "complete"
                    } else {
                        "working"
                    };
                    view.auto_goto = Some(StageReport {
                        state: Some(state.to_string()),
                        ..Default::default()
                    });
                }
                Some(stages::AUTO_FOCUS) => {
                    let state = match (finished, self.focus_fails) {
                        (false, _) => "working",
                        (true, false) => "complete",
                        (true, true) => "fail",
                    };
                    view.auto_focus = Some(StageReport {
                        state: Some(state.to_string()),
                        error: self.focus_fails.then(|| "star not found".to_string()),
                        ..Default::default()
                    });
                }
                Some(stages::STACK) => {
                    view.stack = Some(StageReport {
                        state: Some("working".to_string()),
                        stacked_frame: Some(polls),
                        ..Default::default()
                    });
                }
                _ => {}
            }
            Ok(view)
        }
    }
}
