//! Explore-search browsing session that watches, likes and comments on reels.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

use crate::app::config::ScrollerSettings;
use crate::app::error::AppError;
use crate::app::models::WarmupSummary;
use crate::app::state::CancelFlag;
use crate::app::ui::catalog::Loc;
use crate::app::ui::engine::{ElementInfo, UiEngine};

const DEFAULT_KEYWORD: &str = "reels";
const THUMBNAIL_TAP_OFFSET: i32 = 12;

pub struct WarmupSession<'a> {
    engine: &'a UiEngine,
    settings: &'a ScrollerSettings,
    cancel: CancelFlag,
}

impl<'a> WarmupSession<'a> {
    pub fn new(engine: &'a UiEngine, settings: &'a ScrollerSettings) -> Self {
        Self {
            engine,
            settings,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn pause(&self, label: &str) {
        let [lo, hi] = self.settings.delay_range(label);
        self.engine.pacer().sleep_between(lo, hi);
    }

    fn pick_keyword(&self) -> String {
        self.settings
            .keywords
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_KEYWORD.to_string())
    }

    /// Runs until `max_scrolls`, the runtime budget, or cancellation, whichever comes first.
    pub fn run(&self, keyword: Option<&str>) -> Result<WarmupSummary, AppError> {
        let keyword = keyword.map(str::to_string).unwrap_or_else(|| self.pick_keyword());
        let trace_id = self.engine.trace_id().to_string();
        let started = Instant::now();
        let mut summary = WarmupSummary {
            keyword: keyword.clone(),
            ..WarmupSummary::default()
        };
        if self.cancel.is_set() {
            summary.aborted = true;
            return Ok(summary);
        }
        info!(trace_id = %trace_id, keyword = %keyword, "warmup started");

        self.open_search(&keyword)?;

        let budget = self
            .engine
            .pacer()
            .scale(Duration::from_secs(self.settings.max_runtime_seconds));
        let timed = self.engine.pacer().time_scale() > 0.0;
        let mut rng = rand::thread_rng();
        let mut seen: HashSet<String> = HashSet::new();
        let mut actions = 0u32;
        let mut next_idle = actions + self.idle_interval(&mut rng);

        'session: while summary.scrolls < self.settings.max_scrolls {
            if timed && started.elapsed() >= budget {
                info!(trace_id = %trace_id, "warmup runtime budget reached");
                break;
            }
            if self.cancel.is_set() {
                summary.aborted = true;
                break;
            }
            let thumbnails = self.engine.find_all(self.engine.loc(Loc::ReelThumbnail));
            for thumbnail in thumbnails {
                if self.cancel.is_set() {
                    summary.aborted = true;
                    break 'session;
                }
                if !seen.insert(thumbnail_key(&thumbnail)) {
                    continue;
                }
                if !rng.gen_bool(self.settings.percent_reels_to_watch.clamp(0.0, 1.0)) {
                    continue;
                }
                if self.watch_reel(&thumbnail, &mut summary, &mut rng) {
                    actions += 1;
                }
                if actions >= next_idle {
                    let [lo, hi] = self.settings.idle_duration_range;
                    let idled = self.engine.pacer().sleep_between(lo, hi);
                    summary.idle_breaks += 1;
                    info!(trace_id = %trace_id, seconds = idled, "idle break");
                    next_idle = actions + self.idle_interval(&mut rng);
                }
            }
            self.pause("before_scroll");
            if !self.engine.scroll_down_humanlike() {
                warn!(trace_id = %trace_id, "⚠️ scroll gesture failed");
            }
            summary.scrolls += 1;
        }

        summary.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            trace_id = %trace_id,
            keyword = %summary.keyword,
            reels = summary.total_reels_processed,
            liked = summary.total_liked,
            comments = summary.comment_interactions,
            scrolls = summary.scrolls,
            aborted = summary.aborted,
            "✅ warmup finished"
        );
        Ok(summary)
    }

    fn idle_interval(&self, rng: &mut impl Rng) -> u32 {
        let [lo, hi] = self.settings.idle_after_actions;
        let lo = lo.max(1);
        rng.gen_range(lo..=hi.max(lo))
    }

    fn open_search(&self, keyword: &str) -> Result<(), AppError> {
        let engine = self.engine;
        if !engine.click_loc(Loc::ExploreTab, Duration::from_secs(10)) {
            return Err(AppError::dependency("Explore tab not found", engine.trace_id()));
        }
        self.pause("between_actions");
        if !engine.click_loc(Loc::ExploreSearchBar, Duration::from_secs(10)) {
            return Err(AppError::dependency("Explore search bar not found", engine.trace_id()));
        }
        if !engine.input_text(engine.loc(Loc::SearchInput), keyword, true, Duration::from_secs(10)) {
            return Err(AppError::dependency("Typing search keyword failed", engine.trace_id()));
        }
        engine.press_enter();
        self.pause("after_search");
        if !engine.click_if_exists(engine.loc(Loc::SearchReelsTab), Duration::from_secs(5)) {
            warn!(trace_id = %engine.trace_id(), "⚠️ Reels filter not shown, browsing mixed results");
        }
        Ok(())
    }

    /// Opens one reel, maybe likes and comments, and returns to the grid.
    fn watch_reel(&self, thumbnail: &ElementInfo, summary: &mut WarmupSummary, rng: &mut impl Rng) -> bool {
        let engine = self.engine;
        if engine
            .gestures()
            .tap_random_within(thumbnail.bounds, THUMBNAIL_TAP_OFFSET)
            .is_err()
        {
            return false;
        }
        if !engine.wait_for_element_appear(engine.loc(Loc::ReelViewer), Duration::from_secs(8), None) {
            warn!(trace_id = %engine.trace_id(), reel = %thumbnail.content_desc, "⚠️ reel viewer did not open");
            return false;
        }
        summary.total_reels_processed += 1;
        self.pause("after_open_reel");
        let [lo, hi] = self.settings.watch_time_range;
        engine.pacer().sleep_between(lo, hi);

        if rng.gen_bool(self.settings.like_probability.clamp(0.0, 1.0)) && self.like_current() {
            summary.total_liked += 1;
            self.pause("after_like");
        }
        if rng.gen_bool(self.settings.comment_probability.clamp(0.0, 1.0)) && self.comment_current(rng) {
            summary.comment_interactions += 1;
            self.pause("after_comment");
        }

        engine.press_back();
        let grid = [engine.loc(Loc::ReelThumbnail), engine.loc(Loc::SearchReelsTab)];
        if engine.wait_for_any(&grid, Duration::from_secs(5)).is_none() {
            warn!(trace_id = %engine.trace_id(), "⚠️ grid not visible after leaving reel, pressing back again");
            engine.press_back();
        }
        self.pause("between_actions");
        true
    }

    fn like_current(&self) -> bool {
        let engine = self.engine;
        if engine.element_exists(engine.loc(Loc::LikedButton)) {
            return false;
        }
        if !engine.tap_random_within_element(engine.loc(Loc::LikeButton), 4) {
            return false;
        }
        engine.wait_for_element_appear(engine.loc(Loc::LikedButton), Duration::from_secs(3), None)
    }

    /// Opens the comment sheet; posts a pooled comment when the pool is non-empty.
    fn comment_current(&self, rng: &mut impl Rng) -> bool {
        let engine = self.engine;
        if !engine.click_loc(Loc::CommentButton, Duration::from_secs(3)) {
            return false;
        }
        if !engine.wait_for_element_appear(engine.loc(Loc::CommentSheet), Duration::from_secs(5), None) {
            return false;
        }
        match self.settings.comment_pool.choose(rng) {
            Some(comment) => {
                if engine.input_text(engine.loc(Loc::CommentInput), comment, false, Duration::from_secs(5)) {
                    engine.click_loc(Loc::PostCommentButton, Duration::from_secs(5));
                }
            }
            None => {
                let [lo, hi] = self.settings.delay_range("between_actions");
                engine.pacer().sleep_between(lo, hi);
            }
        }
        engine.press_back();
        true
    }
}

fn thumbnail_key(element: &ElementInfo) -> String {
    if element.content_desc.is_empty() {
        format!("{}@{:?}", element.resource_id, element.bounds)
    } else {
        element.content_desc.clone()
    }
}
