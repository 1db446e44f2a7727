// crates/playback/tests/controller_tests.rs
//
// Controller behavior against an in-memory database and the engine's
// test seams: chapter navigation, persistence, the sleep timer and
// missing-file handling.

use media_engine::testing::{
    failing_source_factory, memory_sink_factory, silence_source_factory, CountingWakeLock,
};
use media_engine::{PlayerCapabilities, SourceFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use talebox_core::{Book, BookType, Chapter, Duration, Event, EventBus, PlayState};
use talebox_database::{create_in_memory, run_migrations};
use talebox_library::BookRepository;
use talebox_playback::{PlayerConfig, PlayerController, SkipDirection};

fn chapter(path: &str, secs: u64) -> Chapter {
    Chapter::new(path, path, Duration::from_seconds(secs))
}

fn three_chapter_book() -> Book {
    Book::new(
        "Test Book",
        "/audio/test",
        BookType::SingleFolder,
        vec![
            chapter("/audio/test/01.mp3", 15),
            chapter("/audio/test/02.mp3", 20),
            chapter("/audio/test/03.mp3", 10),
        ],
    )
}

async fn repo_with(book: Book) -> (Arc<BookRepository>, Book, EventBus) {
    let pool = create_in_memory().await.unwrap();
    run_migrations(&pool).await.unwrap();
    let bus = EventBus::new();
    let repo = Arc::new(BookRepository::new(pool, bus.clone()).await.unwrap());
    let book = repo.add_book(book).await.unwrap();
    (repo, book, bus)
}

fn controller_with(
    repo: Arc<BookRepository>,
    bus: EventBus,
    config: PlayerConfig,
    source: SourceFactory,
    write_delay: Option<StdDuration>,
) -> PlayerController {
    let (sink_factory, _stats) = memory_sink_factory(write_delay);
    PlayerController::new(
        repo,
        bus,
        config,
        source,
        sink_factory,
        Arc::new(CountingWakeLock::default()),
        PlayerCapabilities::default(),
    )
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    panic!("condition not met within five seconds");
}

#[tokio::test(flavor = "multi_thread")]
async fn previous_rewinds_current_chapter_past_the_threshold() {
    let (repo, mut book, bus) = repo_with(three_chapter_book()).await;
    book.current_file = "/audio/test/02.mp3".into();
    book.time = Duration::from_millis(3_000);

    let controller = controller_with(
        repo,
        bus,
        PlayerConfig::default(),
        silence_source_factory(60_000),
        None,
    );
    controller.init(book).await;
    controller.previous(true).await;

    let book = controller.current_book().await.unwrap();
    assert_eq!(book.current_file, Path::new("/audio/test/02.mp3"));
    assert_eq!(book.time, Duration::ZERO);
}

#[tokio::test(flavor = "multi_thread")]
async fn previous_goes_to_the_prior_chapter_near_the_start() {
    let (repo, mut book, bus) = repo_with(three_chapter_book()).await;
    book.current_file = "/audio/test/02.mp3".into();
    book.time = Duration::from_millis(1_000);

    let controller = controller_with(
        repo,
        bus,
        PlayerConfig::default(),
        silence_source_factory(60_000),
        None,
    );
    controller.init(book).await;
    controller.previous(true).await;

    let book = controller.current_book().await.unwrap();
    assert_eq!(book.current_file, Path::new("/audio/test/01.mp3"));
    assert_eq!(book.time, Duration::ZERO);
}

#[tokio::test(flavor = "multi_thread")]
async fn previous_on_the_first_chapter_rewinds() {
    let (repo, mut book, bus) = repo_with(three_chapter_book()).await;
    book.time = Duration::from_millis(500);

    let controller = controller_with(
        repo,
        bus,
        PlayerConfig::default(),
        silence_source_factory(60_000),
        None,
    );
    controller.init(book).await;
    controller.previous(true).await;

    let book = controller.current_book().await.unwrap();
    assert_eq!(book.current_file, Path::new("/audio/test/01.mp3"));
    assert_eq!(book.time, Duration::ZERO);
}

#[tokio::test(flavor = "multi_thread")]
async fn next_advances_and_persists() {
    let (repo, book, bus) = repo_with(three_chapter_book()).await;
    let id = book.id;

    let controller = controller_with(
        repo.clone(),
        bus,
        PlayerConfig::default(),
        silence_source_factory(60_000),
        None,
    );
    controller.init(book).await;
    controller.next().await;

    let book = controller.current_book().await.unwrap();
    assert_eq!(book.current_file, Path::new("/audio/test/02.mp3"));
    assert_eq!(book.time, Duration::ZERO);

    let stored = repo.book(id).await.unwrap();
    assert_eq!(stored.current_file, Path::new("/audio/test/02.mp3"));
}

#[tokio::test(flavor = "multi_thread")]
async fn next_on_the_last_chapter_does_nothing() {
    let (repo, mut book, bus) = repo_with(three_chapter_book()).await;
    book.current_file = "/audio/test/03.mp3".into();
    book.time = Duration::from_millis(4_000);

    let controller = controller_with(
        repo,
        bus,
        PlayerConfig::default(),
        silence_source_factory(60_000),
        None,
    );
    controller.init(book).await;
    controller.next().await;

    let book = controller.current_book().await.unwrap();
    assert_eq!(book.current_file, Path::new("/audio/test/03.mp3"));
    assert_eq!(book.time, Duration::from_millis(4_000));
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_forward_carries_the_overshoot_into_the_next_chapter() {
    let (repo, mut book, bus) = repo_with(three_chapter_book()).await;
    book.time = Duration::from_millis(10_000);

    let controller = controller_with(
        repo,
        bus,
        PlayerConfig::default(),
        silence_source_factory(60_000),
        None,
    );
    controller.init(book).await;
    controller.skip(SkipDirection::Forward).await;

    // 10s + 20s jump crosses the 15s first chapter with 15s left over
    let book = controller.current_book().await.unwrap();
    assert_eq!(book.current_file, Path::new("/audio/test/02.mp3"));
    assert_eq!(book.time, Duration::from_millis(15_000));
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_backward_carries_into_the_previous_chapter() {
    let (repo, mut book, bus) = repo_with(three_chapter_book()).await;
    book.current_file = "/audio/test/02.mp3".into();
    book.time = Duration::from_millis(5_000);

    let controller = controller_with(
        repo,
        bus,
        PlayerConfig::default(),
        silence_source_factory(60_000),
        None,
    );
    controller.init(book).await;
    controller.skip(SkipDirection::Backward).await;

    // 5s back 20s lands 15s before the end of the 15s first chapter
    let book = controller.current_book().await.unwrap();
    assert_eq!(book.current_file, Path::new("/audio/test/01.mp3"));
    assert_eq!(book.time, Duration::ZERO);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_sleep_timer_pauses_after_the_current_chapter() {
    let book = Book::new(
        "Short Book",
        "/audio/short",
        BookType::SingleFolder,
        vec![
            chapter("/audio/short/01.mp3", 1),
            chapter("/audio/short/02.mp3", 1),
        ],
    );
    let (repo, book, bus) = repo_with(book).await;
    let mut rx = bus.subscribe();

    let controller = controller_with(
        repo,
        bus,
        PlayerConfig::default(),
        silence_source_factory(200),
        None,
    );
    controller.init(book).await;

    controller.toggle_sleep_timer();
    assert!(controller.sleep_timer_active());
    assert!(matches!(
        tokio::time::timeout(StdDuration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap(),
        Event::SleepStateChanged { active: true }
    ));

    // toggling again before expiry softens the timer into "finish the
    // current chapter" instead of stopping right away
    controller.toggle_sleep_timer();
    assert!(!controller.sleep_timer_active());
    assert!(matches!(
        tokio::time::timeout(StdDuration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap(),
        Event::SleepStateChanged { active: false }
    ));
    assert_eq!(controller.play_state(), PlayState::Stopped);

    controller.play().await;
    wait_for(|| controller.play_state() == PlayState::Paused).await;

    // the chapter finished and the book did not advance
    let book = controller.current_book().await.unwrap();
    assert_eq!(book.current_file, Path::new("/audio/short/01.mp3"));
    assert_eq!(book.time, Duration::from_seconds(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_sleep_timer_stops_playback() {
    let (repo, book, bus) = repo_with(three_chapter_book()).await;

    let config = PlayerConfig {
        sleep_timer_minutes: 0,
        ..PlayerConfig::default()
    };
    let controller = controller_with(
        repo,
        bus,
        config,
        silence_source_factory(600_000),
        Some(StdDuration::from_millis(20)),
    );
    controller.init(book).await;
    controller.play().await;
    assert_eq!(controller.play_state(), PlayState::Playing);

    controller.toggle_sleep_timer();
    wait_for(|| controller.play_state() == PlayState::Stopped).await;
    assert!(!controller.sleep_timer_active());
}

#[tokio::test(flavor = "multi_thread")]
async fn finished_book_walks_all_chapters_then_stops() {
    let book = Book::new(
        "Short Book",
        "/audio/short",
        BookType::SingleFolder,
        vec![
            chapter("/audio/short/01.mp3", 1),
            chapter("/audio/short/02.mp3", 1),
        ],
    );
    let (repo, book, bus) = repo_with(book).await;
    let id = book.id;

    let controller = controller_with(
        repo.clone(),
        bus,
        PlayerConfig::default(),
        silence_source_factory(150),
        None,
    );
    controller.init(book).await;
    controller.play().await;

    wait_for(|| controller.play_state() == PlayState::Stopped).await;

    let book = controller.current_book().await.unwrap();
    assert_eq!(book.current_file, Path::new("/audio/short/02.mp3"));
    assert_eq!(book.time, Duration::from_seconds(1));

    let stored = repo.book(id).await.unwrap();
    assert_eq!(stored.current_file, Path::new("/audio/short/02.mp3"));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_file_removes_the_book() {
    let (repo, book, bus) = repo_with(three_chapter_book()).await;
    let id = book.id;
    let mut rx = bus.subscribe();

    let controller = controller_with(
        repo.clone(),
        bus,
        PlayerConfig::default(),
        failing_source_factory(),
        None,
    );
    controller.init(book).await;
    controller.play().await;

    wait_for(|| controller.play_state() == PlayState::Stopped).await;
    assert!(controller.current_book().await.is_none());
    assert!(repo.book(id).await.is_none());

    let mut saw_missing = false;
    while let Ok(Ok(event)) =
        tokio::time::timeout(StdDuration::from_millis(200), rx.recv()).await
    {
        if matches!(event, Event::BookFileMissing(missing) if missing == id) {
            saw_missing = true;
            break;
        }
    }
    assert!(saw_missing);
}

#[tokio::test(flavor = "multi_thread")]
async fn position_sync_writes_back_while_playing() {
    let (repo, book, bus) = repo_with(three_chapter_book()).await;
    let id = book.id;

    let controller = controller_with(
        repo.clone(),
        bus,
        PlayerConfig::default(),
        silence_source_factory(600_000),
        Some(StdDuration::from_millis(20)),
    );
    controller.init(book).await;
    controller.play().await;
    assert_eq!(controller.play_state(), PlayState::Playing);

    // the sync task persists once per second
    let mut persisted = false;
    for _ in 0..200 {
        if repo
            .book(id)
            .await
            .map(|b| !b.time.is_zero())
            .unwrap_or(false)
        {
            persisted = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    assert!(persisted);

    controller.stop().await;
    assert_eq!(controller.play_state(), PlayState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_with_rewind_backs_the_position_up() {
    let (repo, book, bus) = repo_with(three_chapter_book()).await;

    let controller = controller_with(
        repo,
        bus,
        PlayerConfig::default(),
        silence_source_factory(600_000),
        Some(StdDuration::from_millis(20)),
    );
    controller.init(book).await;
    controller.play().await;
    tokio::time::sleep(StdDuration::from_millis(700)).await;

    controller.pause(true).await;
    assert_eq!(controller.play_state(), PlayState::Paused);

    controller.play().await;
    assert_eq!(controller.play_state(), PlayState::Playing);
    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn speed_changes_persist_on_the_book() {
    let (repo, book, bus) = repo_with(three_chapter_book()).await;
    let id = book.id;

    let controller = controller_with(
        repo.clone(),
        bus,
        PlayerConfig::default(),
        silence_source_factory(60_000),
        None,
    );
    controller.init(book).await;
    controller.set_playback_speed(1.75).await;

    let stored = repo.book(id).await.unwrap();
    assert!((stored.playback_speed - 1.75).abs() < f32::EPSILON);

    // out-of-range values clamp instead of failing
    controller.set_playback_speed(9.0).await;
    let stored = repo.book(id).await.unwrap();
    assert!((stored.playback_speed - 3.0).abs() < f32::EPSILON);
}

#[tokio::test(flavor = "multi_thread")]
async fn unplugging_pauses_and_replug_resumes_when_configured() {
    let (repo, book, bus) = repo_with(three_chapter_book()).await;

    let controller = controller_with(
        repo,
        bus,
        PlayerConfig::default(),
        silence_source_factory(600_000),
        Some(StdDuration::from_millis(20)),
    );
    controller.init(book).await;
    controller.play().await;
    assert_eq!(controller.play_state(), PlayState::Playing);

    controller.audio_becomes_noisy().await;
    assert_eq!(controller.play_state(), PlayState::Paused);

    controller.headset_plugged().await;
    assert_eq!(controller.play_state(), PlayState::Playing);
    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn replug_stays_paused_when_resume_is_off() {
    let (repo, book, bus) = repo_with(three_chapter_book()).await;
    let config = PlayerConfig {
        resume_on_replug: false,
        ..PlayerConfig::default()
    };

    let controller = controller_with(
        repo,
        bus,
        config,
        silence_source_factory(600_000),
        Some(StdDuration::from_millis(20)),
    );
    controller.init(book).await;
    controller.play().await;
    controller.audio_becomes_noisy().await;
    assert_eq!(controller.play_state(), PlayState::Paused);

    controller.headset_plugged().await;
    assert_eq!(controller.play_state(), PlayState::Paused);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_focus_loss_pauses_only_when_configured() {
    let (repo, book, bus) = repo_with(three_chapter_book()).await;

    // default config keeps playing through a transient loss
    let controller = controller_with(
        repo.clone(),
        bus.clone(),
        PlayerConfig::default(),
        silence_source_factory(600_000),
        Some(StdDuration::from_millis(20)),
    );
    controller.init(book.clone()).await;
    controller.play().await;
    controller.transient_focus_loss().await;
    assert_eq!(controller.play_state(), PlayState::Playing);
    controller.stop().await;

    let config = PlayerConfig {
        pause_on_transient_focus_loss: true,
        ..PlayerConfig::default()
    };
    let controller = controller_with(
        repo,
        bus,
        config,
        silence_source_factory(600_000),
        Some(StdDuration::from_millis(20)),
    );
    controller.init(book).await;
    controller.play().await;
    controller.transient_focus_loss().await;
    assert_eq!(controller.play_state(), PlayState::Paused);
}
