//! Recruitment flow: wizard, provisioning, roster, watcher and teardown.
//!
//! All components share one [`RecruitContext`] (store, platform, config).
//! None of them hold a `Session` across an await; they re-read it from the
//! store by initiator before every mutation.

pub mod announcement;
pub mod participants;
pub mod provisioner;
pub mod teardown;
pub mod watcher;
pub mod wizard;

use std::sync::Arc;

use crate::config::Config;
use crate::platform::Platform;
use crate::session::SessionStore;

pub use announcement::{AnnouncementSync, Closure};
pub use participants::{Joined, Left, ParticipantRegistry};
pub use provisioner::{Provisioned, ResourceProvisioner};
pub use teardown::{TeardownCause, TeardownCoordinator, TeardownOutcome};
pub use watcher::{LifecycleWatcher, WatchOutcome};
pub use wizard::WizardStateMachine;

/// Dependencies shared by every recruitment component.
#[derive(Clone)]
pub struct RecruitContext {
    pub store: SessionStore,
    pub platform: Arc<dyn Platform>,
    pub config: Arc<Config>,
}

impl RecruitContext {
    pub fn new(store: SessionStore, platform: Arc<dyn Platform>, config: Arc<Config>) -> Self {
        Self {
            store,
            platform,
            config,
        }
    }
}

/// The wired-up recruitment components.
#[derive(Clone)]
pub struct Recruiter {
    pub ctx: RecruitContext,
    pub wizard: WizardStateMachine,
    pub participants: ParticipantRegistry,
    pub teardown: TeardownCoordinator,
    pub sync: AnnouncementSync,
}

impl Recruiter {
    pub fn new(ctx: RecruitContext) -> Self {
        let sync = AnnouncementSync::new(ctx.clone());
        let teardown = TeardownCoordinator::new(ctx.clone());
        let provisioner = ResourceProvisioner::new(ctx.clone(), teardown.clone());
        Self {
            wizard: WizardStateMachine::new(ctx.clone(), provisioner),
            participants: ParticipantRegistry::new(ctx.clone(), sync.clone()),
            teardown,
            sync,
            ctx,
        }
    }
}
