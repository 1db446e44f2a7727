// crates/playback/src/controller.rs
//
// Book-aware playback control on top of the media engine. All operations
// funnel through one async mutex so button mashing from several tasks
// cannot interleave half-finished player transitions. Position flows back
// into the repository once per second while playing.

use crate::config::PlayerConfig;
use media_engine::{
    EngineError, EngineResult, PlaybackState, PlayerCapabilities, PlayerEvent, SinkFactory,
    SourceFactory, SpeedPlayer, WakeLock,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use talebox_core::{Book, BookId, Duration, EventBus, PlaybackSpeed, PlayState};
use talebox_library::BookRepository;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

/// Threshold below which `previous` goes to the preceding chapter instead
/// of rewinding the current one
const PREVIOUS_TRACK_THRESHOLD_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDirection {
    Forward,
    Backward,
}

struct Session {
    player: SpeedPlayer,
    book: Option<Book>,
}

struct Inner {
    repo: Arc<BookRepository>,
    bus: EventBus,
    config: PlayerConfig,
    session: AsyncMutex<Session>,
    play_state: std::sync::Mutex<PlayState>,
    /// Second phase of the sleep timer: finish the current chapter, then
    /// pause instead of advancing
    stop_after_current: AtomicBool,
    sleep_active: AtomicBool,
    sleep_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Serialized front door for everything playback
pub struct PlayerController {
    inner: Arc<Inner>,
    background: Vec<JoinHandle<()>>,
}

impl PlayerController {
    /// Builds a controller with injected engine seams. Must run inside a
    /// tokio runtime; spawns the position-sync and event-consumer tasks.
    pub fn new(
        repo: Arc<BookRepository>,
        bus: EventBus,
        config: PlayerConfig,
        source_factory: SourceFactory,
        sink_factory: SinkFactory,
        wake_lock: Arc<dyn WakeLock>,
        capabilities: PlayerCapabilities,
    ) -> Self {
        let (player, events) = SpeedPlayer::new(source_factory, sink_factory, wake_lock, capabilities);
        let inner = Arc::new(Inner {
            repo,
            bus,
            config,
            session: AsyncMutex::new(Session { player, book: None }),
            play_state: std::sync::Mutex::new(PlayState::Stopped),
            stop_after_current: AtomicBool::new(false),
            sleep_active: AtomicBool::new(false),
            sleep_task: std::sync::Mutex::new(None),
        });

        let consumer = tokio::spawn(consume_player_events(Arc::downgrade(&inner), events));
        let syncer = tokio::spawn(sync_position(Arc::downgrade(&inner)));

        Self {
            inner,
            background: vec![consumer, syncer],
        }
    }

    /// Controller with the real decoder and device output
    pub fn with_defaults(
        repo: Arc<BookRepository>,
        bus: EventBus,
        config: PlayerConfig,
    ) -> Self {
        Self::new(
            repo,
            bus,
            config,
            media_engine::default_source_factory(),
            media_engine::default_sink_factory(),
            Arc::new(media_engine::NoopWakeLock),
            PlayerCapabilities::default(),
        )
    }

    /// Swaps in a book to control. Any playing book stops; the new one is
    /// prepared lazily when `play` is next called.
    pub async fn init(&self, book: Book) {
        let mut session = self.inner.session.lock().await;
        let old = session
            .book
            .as_ref()
            .map(|b| b.id)
            .unwrap_or(BookId::UNASSIGNED);
        if session.player.state() != PlaybackState::Idle {
            let _ = session.player.reset();
        }
        session.book = Some(book);
        drop(session);
        self.inner.set_play_state(PlayState::Stopped);
        self.inner.bus.current_book_id_changed(old);
    }

    pub async fn current_book(&self) -> Option<Book> {
        self.inner.session.lock().await.book.clone()
    }

    pub fn play_state(&self) -> PlayState {
        *self.inner.play_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sleep_timer_active(&self) -> bool {
        self.inner.sleep_active.load(Ordering::SeqCst)
    }

    pub async fn play(&self) {
        let mut session = self.inner.session.lock().await;
        if session.book.is_none() {
            return;
        }
        let result = self.inner.play_locked(&mut session).await;
        drop(session);
        if let Err(e) = result {
            self.inner.handle_engine_failure(e).await;
        }
    }

    /// Pauses playback, optionally rewinding a little so the listener can
    /// pick the thread of the narration back up.
    pub async fn pause(&self, rewind: bool) {
        let mut session = self.inner.session.lock().await;
        if session.player.state() != PlaybackState::Started {
            return;
        }
        if let Err(e) = session.player.pause() {
            drop(session);
            self.inner.handle_engine_failure(e).await;
            return;
        }
        if let Some(position) = safe_position(&session.player) {
            let mut target = position;
            if rewind && self.inner.config.auto_rewind_secs > 0 {
                target = position.saturating_sub(self.inner.config.auto_rewind_secs * 1_000);
                if let Err(e) = session.player.seek_to(target) {
                    log::warn!("auto-rewind to {target}ms failed: {e}");
                    target = position;
                }
            }
            if let Some(book) = session.book.as_mut() {
                book.time = Duration::from_millis(target);
            }
        }
        self.inner.persist_locked(&mut session).await;
        drop(session);
        self.inner.set_play_state(PlayState::Paused);
    }

    pub async fn play_pause(&self) {
        if self.play_state() == PlayState::Playing {
            self.pause(true).await;
        } else {
            self.play().await;
        }
    }

    /// The output route went away (headphones unplugged); always pause so
    /// narration does not blast from the speaker
    pub async fn audio_becomes_noisy(&self) {
        self.pause(true).await;
    }

    /// Headphones plugged back in; resumes only when configured and the
    /// interruption left us paused
    pub async fn headset_plugged(&self) {
        if self.inner.config.resume_on_replug && self.play_state() == PlayState::Paused {
            self.play().await;
        }
    }

    /// A transient focus loss (navigation prompt, notification sound).
    /// Pauses when configured to; otherwise playback keeps running.
    pub async fn transient_focus_loss(&self) {
        if self.inner.config.pause_on_transient_focus_loss
            && self.play_state() == PlayState::Playing
        {
            self.pause(false).await;
        }
    }

    /// Moves to `time` within the chapter at `path`, switching chapters
    /// when needed. Positions outside the book are ignored.
    pub async fn change_position(&self, time: Duration, path: &Path) {
        let mut session = self.inner.session.lock().await;
        let result = self
            .inner
            .change_position_locked(&mut session, time.as_millis(), path.to_path_buf())
            .await;
        drop(session);
        if let Err(e) = result {
            self.inner.handle_engine_failure(e).await;
        }
    }

    /// Jumps by the configured seek time, crossing chapter boundaries with
    /// the overshoot carried over.
    pub async fn skip(&self, direction: SkipDirection) {
        let mut session = self.inner.session.lock().await;
        let Some(book) = session.book.clone() else {
            return;
        };
        let Some(chapter) = book.current_chapter() else {
            return;
        };
        let delta = self.inner.config.seek_time_secs * 1_000;
        let position = safe_position(&session.player)
            .unwrap_or_else(|| book.time.as_millis());

        let (target_ms, target_path) = match direction {
            SkipDirection::Forward => {
                let chapter_ms = chapter.duration.as_millis();
                let wanted = position + delta;
                if wanted < chapter_ms {
                    (wanted, book.current_file.clone())
                } else if let Some(next) = book.next_chapter() {
                    (wanted - chapter_ms, next.path.clone())
                } else {
                    (chapter_ms, book.current_file.clone())
                }
            }
            SkipDirection::Backward => {
                if position >= delta {
                    (position - delta, book.current_file.clone())
                } else if let Some(previous) = book.previous_chapter() {
                    let carry = delta - position;
                    (
                        previous.duration.as_millis().saturating_sub(carry),
                        previous.path.clone(),
                    )
                } else {
                    (0, book.current_file.clone())
                }
            }
        };

        let result = self
            .inner
            .change_position_locked(&mut session, target_ms, target_path)
            .await;
        drop(session);
        if let Err(e) = result {
            self.inner.handle_engine_failure(e).await;
        }
    }

    /// Start of the next chapter; does nothing on the last one
    pub async fn next(&self) {
        let mut session = self.inner.session.lock().await;
        let Some(next_path) = session
            .book
            .as_ref()
            .and_then(|b| b.next_chapter())
            .map(|c| c.path.clone())
        else {
            return;
        };
        let result = self
            .inner
            .change_position_locked(&mut session, 0, next_path)
            .await;
        drop(session);
        if let Err(e) = result {
            self.inner.handle_engine_failure(e).await;
        }
    }

    /// Early in a chapter this goes to the previous one; past the first
    /// couple of seconds it rewinds the current chapter instead, the way
    /// physical players behave.
    pub async fn previous(&self, to_start_of_new_chapter: bool) {
        let mut session = self.inner.session.lock().await;
        let Some(book) = session.book.clone() else {
            return;
        };
        let position = safe_position(&session.player)
            .unwrap_or_else(|| book.time.as_millis());

        let (target_ms, target_path) = match book.previous_chapter() {
            Some(previous) if position <= PREVIOUS_TRACK_THRESHOLD_MS => {
                if to_start_of_new_chapter {
                    (0, previous.path.clone())
                } else {
                    let back_in = previous
                        .duration
                        .as_millis()
                        .saturating_sub(self.inner.config.seek_time_secs * 1_000);
                    (back_in, previous.path.clone())
                }
            }
            _ => (0, book.current_file.clone()),
        };

        let result = self
            .inner
            .change_position_locked(&mut session, target_ms, target_path)
            .await;
        drop(session);
        if let Err(e) = result {
            self.inner.handle_engine_failure(e).await;
        }
    }

    /// Applies a new speed to both the running player and the book record
    pub async fn set_playback_speed(&self, speed: f32) {
        let speed = PlaybackSpeed::clamped(speed).value();
        let mut session = self.inner.session.lock().await;
        if session.player.state() != PlaybackState::Dead {
            session.player.set_playback_speed(speed);
        }
        if let Some(book) = session.book.as_mut() {
            book.playback_speed = speed;
        }
        self.inner.persist_locked(&mut session).await;
    }

    /// Arms the sleep timer, or softens an armed one. Expiry stops
    /// playback outright; toggling again before expiry cancels the timer
    /// and instead lets the current chapter finish before pausing, so the
    /// listener is not cut off mid-sentence.
    pub fn toggle_sleep_timer(&self) {
        if self.inner.sleep_active.swap(false, Ordering::SeqCst) {
            if let Some(task) = self
                .inner
                .sleep_task
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
            {
                task.abort();
            }
            self.inner.stop_after_current.store(true, Ordering::SeqCst);
            self.inner.bus.sleep_state_changed(false);
            return;
        }

        self.inner.sleep_active.store(true, Ordering::SeqCst);
        self.inner.stop_after_current.store(false, Ordering::SeqCst);
        self.inner.bus.sleep_state_changed(true);
        let weak = Arc::downgrade(&self.inner);
        let minutes = self.inner.config.sleep_timer_minutes;
        let task = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(minutes * 60)).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.sleep_active.swap(false, Ordering::SeqCst) {
                inner.bus.sleep_state_changed(false);
                inner.stop_playback().await;
            }
        });
        *self
            .inner
            .sleep_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    /// Stops playback and forgets the prepared file; the book stays
    /// current so `play` starts it again from the saved position.
    pub async fn stop(&self) {
        self.inner.cancel_sleep_timer();
        self.inner.stop_playback().await;
    }

    /// Final teardown: persists the position, releases the engine and
    /// stops the background tasks. The controller is unusable afterwards.
    pub async fn shutdown(&mut self) {
        {
            let mut session = self.inner.session.lock().await;
            if session.player.state() == PlaybackState::Started {
                if let Some(position) = safe_position(&session.player) {
                    if let Some(book) = session.book.as_mut() {
                        book.time = Duration::from_millis(position);
                    }
                }
            }
            self.inner.persist_locked(&mut session).await;
            session.player.release();
        }
        self.inner.cancel_sleep_timer();
        for task in self.background.drain(..) {
            task.abort();
        }
        self.inner.set_play_state(PlayState::Stopped);
    }
}

impl Drop for PlayerController {
    fn drop(&mut self) {
        for task in self.background.drain(..) {
            task.abort();
        }
    }
}

impl Inner {
    fn set_play_state(&self, next: PlayState) {
        let mut state = self.play_state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            log::debug!("play state {:?} -> {next:?}", *state);
            *state = next;
            self.bus.play_state_changed(next);
        }
    }

    /// Persist the live position, tear the pipeline down to idle, and
    /// announce the stop. The current book is kept.
    async fn stop_playback(&self) {
        let mut session = self.session.lock().await;
        if session.player.state() == PlaybackState::Started {
            if let Some(position) = safe_position(&session.player) {
                if let Some(book) = session.book.as_mut() {
                    book.time = Duration::from_millis(position);
                }
            }
        }
        let _ = session.player.reset();
        self.persist_locked(&mut session).await;
        drop(session);
        self.set_play_state(PlayState::Stopped);
    }

    /// Fully disarm the sleep timer, both phases
    fn cancel_sleep_timer(&self) {
        if self.sleep_active.swap(false, Ordering::SeqCst) {
            self.bus.sleep_state_changed(false);
        }
        if let Some(task) = self
            .sleep_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.stop_after_current.store(false, Ordering::SeqCst);
    }

    async fn persist_locked(&self, session: &mut Session) {
        if let Some(book) = session.book.as_ref() {
            if let Err(e) = self.repo.update_book(book).await {
                log::error!("failed to persist book {}: {e}", book.id);
            }
        }
    }

    /// Prepares the engine for the book's current file and saved position
    fn prepare_locked(&self, session: &mut Session) -> EngineResult<()> {
        let Some(book) = session.book.as_ref() else {
            return Ok(());
        };
        if session.player.state() != PlaybackState::Idle {
            session.player.reset()?;
        }
        session.player.set_data_source(&book.current_file)?;
        session.player.prepare()?;
        if book.time.as_millis() > 0 {
            session.player.seek_to(book.time.as_millis())?;
        }
        session.player.set_playback_speed(book.playback_speed);
        Ok(())
    }

    async fn play_locked(&self, session: &mut Session) -> EngineResult<()> {
        match session.player.state() {
            PlaybackState::Started => return Ok(()),
            PlaybackState::PlaybackCompleted => {
                session.player.seek_to(0)?;
                if let Some(book) = session.book.as_mut() {
                    book.time = Duration::ZERO;
                }
                session.player.start()?;
            }
            PlaybackState::Prepared | PlaybackState::Paused => {
                session.player.start()?;
            }
            _ => {
                self.prepare_locked(session)?;
                session.player.start()?;
            }
        }
        self.persist_locked(session).await;
        self.set_play_state(PlayState::Playing);
        Ok(())
    }

    async fn change_position_locked(
        &self,
        session: &mut Session,
        time_ms: u64,
        path: PathBuf,
    ) -> EngineResult<()> {
        let Some(book) = session.book.as_mut() else {
            return Ok(());
        };
        if book.chapter_at(&path).is_none() {
            log::warn!("ignoring jump to unknown chapter {}", path.display());
            return Ok(());
        }

        let same_chapter = book.current_file == path;
        book.current_file = path;
        book.time = Duration::from_millis(time_ms);

        if same_chapter {
            match session.player.state() {
                PlaybackState::Prepared
                | PlaybackState::Started
                | PlaybackState::Paused => {
                    session.player.seek_to(time_ms)?;
                }
                // a completed player restarts from zero; drop it so the
                // next play prepares at the stored time instead
                PlaybackState::PlaybackCompleted => {
                    session.player.reset()?;
                }
                _ => {}
            }
        } else {
            let was_playing = session.player.state() == PlaybackState::Started
                || *self.play_state.lock().unwrap_or_else(|e| e.into_inner())
                    == PlayState::Playing;
            if session.player.state() != PlaybackState::Idle {
                session.player.reset()?;
            }
            if was_playing {
                self.prepare_locked(session)?;
                session.player.start()?;
            }
        }
        self.persist_locked(session).await;
        self.bus.position_changed();
        Ok(())
    }

    /// A chapter ran to its end: either advance, or honor the sleep timer
    async fn on_completion(&self) {
        let mut session = self.session.lock().await;
        if self.stop_after_current.swap(false, Ordering::SeqCst) {
            if let Some(book) = session.book.as_mut() {
                if let Some(chapter) = book.current_chapter() {
                    book.time = chapter.duration;
                }
            }
            self.persist_locked(&mut session).await;
            drop(session);
            self.set_play_state(PlayState::Paused);
            return;
        }

        let next_path = session
            .book
            .as_ref()
            .and_then(|b| b.next_chapter())
            .map(|c| c.path.clone());
        match next_path {
            Some(path) => {
                let result = self.change_position_locked(&mut session, 0, path).await;
                drop(session);
                if let Err(e) = result {
                    self.handle_engine_failure(e).await;
                }
            }
            None => {
                // end of the book
                if let Some(book) = session.book.as_mut() {
                    if let Some(chapter) = book.current_chapter() {
                        book.time = chapter.duration;
                    }
                }
                self.persist_locked(&mut session).await;
                drop(session);
                self.set_play_state(PlayState::Stopped);
            }
        }
    }

    async fn on_player_error(&self, message: &str) {
        log::error!("player error: {message}");
        let mut session = self.session.lock().await;
        let missing = session
            .book
            .as_ref()
            .map(|b| (b.id, b.current_file.clone()))
            .filter(|(_, path)| !path.exists());
        if let Some((id, path)) = missing {
            log::warn!("removing book {id}, file gone: {}", path.display());
            session.book = None;
            if let Err(e) = self.repo.remove_book(id).await {
                log::error!("failed to remove book {id}: {e}");
            }
            self.bus.book_file_missing(id);
        }
        let _ = session.player.reset();
        drop(session);
        self.set_play_state(PlayState::Stopped);
    }

    async fn handle_engine_failure(&self, error: EngineError) {
        if matches!(error, EngineError::FileMissing(_)) {
            self.on_player_error(&error.to_string()).await;
            return;
        }
        log::error!("playback operation failed: {error}");
        let mut session = self.session.lock().await;
        let _ = session.player.reset();
        drop(session);
        self.set_play_state(PlayState::Stopped);
    }
}

/// Position can only be read in a handful of states; asking anywhere else
/// would trip the engine into its error state
fn safe_position(player: &SpeedPlayer) -> Option<u64> {
    match player.state() {
        PlaybackState::Prepared
        | PlaybackState::Started
        | PlaybackState::Paused
        | PlaybackState::PlaybackCompleted
        | PlaybackState::Stopped => player.current_position().ok(),
        _ => None,
    }
}

/// Background task: once a second, while playing, write the position back
/// to the repository and announce it
async fn sync_position(weak: std::sync::Weak<Inner>) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let playing = {
            *inner.play_state.lock().unwrap_or_else(|e| e.into_inner()) == PlayState::Playing
        };
        if !playing {
            continue;
        }
        let mut session = inner.session.lock().await;
        let Some(position) = safe_position(&session.player) else {
            continue;
        };
        if session.book.is_some() {
            if let Some(book) = session.book.as_mut() {
                book.time = Duration::from_millis(position);
            }
            inner.persist_locked(&mut session).await;
            drop(session);
            inner.bus.position_changed();
        }
    }
}

/// Background task: reacts to completion and error events from the decode
/// thread
async fn consume_player_events(
    weak: std::sync::Weak<Inner>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<PlayerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        match event {
            PlayerEvent::Completed => inner.on_completion().await,
            PlayerEvent::Error(message) => inner.on_player_error(&message).await,
        }
    }
}
