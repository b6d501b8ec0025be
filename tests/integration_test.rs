use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use image::{Rgb, RgbImage};
use image_describer::config::Config;
use image_describer::infrastructure::ResultStore;
use image_describer::models::JobStatus;
use image_describer::orchestrator::{App, BatchProcessor};
use image_describer::{DescriptionStatus, VisionBackend, VisionRequest};

type Responder = Box<dyn Fn(usize, &VisionRequest) -> anyhow::Result<String> + Send + Sync>;

/// 可编排回复的假后端，记录每次收到的请求
struct FakeBackend {
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<VisionRequest>>,
}

impl FakeBackend {
    fn new(responder: impl Fn(usize, &VisionRequest) -> anyhow::Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn always_ok() -> Self {
        Self::new(|n, _| Ok(format!("Description number {}", n)))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<VisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl VisionBackend for FakeBackend {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn describe(&self, request: &VisionRequest) -> anyhow::Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(n, request)
    }
}

fn test_config(root: &Path) -> Config {
    Config {
        openai_api_key: Some("sk-test-key".to_string()),
        upload_root: root.join("uploads"),
        output_root: root.join("outputs"),
        ..Default::default()
    }
}

fn write_image(path: &Path, width: u32, height: u32) -> PathBuf {
    RgbImage::from_fn(width, height, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgb([0, 0, 0])
        } else {
            Rgb([255, 255, 255])
        }
    })
    .save(path)
    .unwrap();
    path.to_path_buf()
}

fn decode_data_url(url: &str) -> image::DynamicImage {
    let (_, encoded) = url.split_once(";base64,").unwrap();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap();
    image::load_from_memory(&bytes).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_mixed_batch_records_every_image() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_image(&dir.path().join("a.png"), 400, 200);
    let b = dir.path().join("b.jpg");
    std::fs::write(&b, b"this is not a jpeg").unwrap();
    let c = write_image(&dir.path().join("c.gif"), 400, 400);

    let config = Config {
        // 等比例缩小的场景：400x400 超过面积上限，400x200 没有
        max_pixel_area: 100_000,
        ..test_config(dir.path())
    };
    let backend = FakeBackend::new(|_, request| {
        if request.image_url.starts_with("data:image/jpeg;base64,dGhpcyBpcyBub3Q") {
            anyhow::bail!("API Error: Invalid image")
        }
        Ok("A checkerboard pattern.".to_string())
    });
    let processor = BatchProcessor::new(config, backend);
    let results_dir = dir.path().join("results");

    let summary = processor
        .run(&[a, b, c], &results_dir, "Biology", "Grade 5")
        .await
        .unwrap();

    assert_eq!(summary.processed_count, 3);
    assert_eq!(summary.failed_count, 1);
    assert_eq!(summary.store_path, results_dir.join("descriptions.xlsx"));

    let store = ResultStore::open(&summary.store_path).unwrap();
    let rows = store.records();
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].filename, "a.png");
    assert_eq!((rows[0].format.as_str(), rows[0].width, rows[0].height), ("PNG", 400, 200));
    assert_eq!(rows[0].subject, "Biology");
    assert_eq!(rows[0].audience, "Grade 5");

    assert_eq!(rows[1].filename, "b.jpg");
    assert_eq!((rows[1].format.as_str(), rows[1].width, rows[1].height), ("Unknown", 0, 0));
    assert!(rows[1].description.starts_with("Error"));
    assert_eq!(rows[1].status, DescriptionStatus::Failed);

    // 表中记录原始尺寸，发送的是缩小后的图片
    assert_eq!((rows[2].format.as_str(), rows[2].width, rows[2].height), ("GIF", 400, 400));
    assert_eq!(rows[2].description, "A checkerboard pattern.");

    let requests = processor.backend().requests();
    let sent_c = decode_data_url(&requests.last().unwrap().image_url);
    assert!(u64::from(sent_c.width()) * u64::from(sent_c.height()) <= 100_000);
    assert!((i64::from(sent_c.width()) - i64::from(sent_c.height())).abs() <= 1);

    let sent_a = decode_data_url(&requests[0].image_url);
    assert_eq!((sent_a.width(), sent_a.height()), (400, 200));
}

#[tokio::test]
async fn test_resume_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let images = vec![
        write_image(&dir.path().join("one.png"), 32, 32),
        write_image(&dir.path().join("two.png"), 48, 16),
    ];
    let results_dir = dir.path().join("results");

    let processor = BatchProcessor::new(test_config(dir.path()), FakeBackend::always_ok());
    let first = processor
        .run(&images, &results_dir, "Geography", "Adults")
        .await
        .unwrap();
    assert_eq!(first.processed_count, 2);
    assert_eq!(processor.backend().calls(), 2);

    let before = std::fs::read(&first.store_path).unwrap();
    let rows_before = ResultStore::open(&first.store_path).unwrap().records().to_vec();

    let second = processor
        .run(&images, &results_dir, "Geography", "Adults")
        .await
        .unwrap();

    assert_eq!(second.processed_count, 0);
    assert_eq!(second.skipped_count, 2);
    assert_eq!(processor.backend().calls(), 2);
    assert_eq!(std::fs::read(&second.store_path).unwrap(), before);
    assert_eq!(
        ResultStore::open(&second.store_path).unwrap().records(),
        rows_before.as_slice()
    );
}

#[tokio::test]
async fn test_resume_only_processes_new_images() {
    let dir = tempfile::tempdir().unwrap();
    let first_image = write_image(&dir.path().join("first.png"), 20, 20);
    let second_image = write_image(&dir.path().join("second.png"), 20, 20);
    let results_dir = dir.path().join("results");

    let processor = BatchProcessor::new(test_config(dir.path()), FakeBackend::always_ok());
    processor
        .run(std::slice::from_ref(&first_image), &results_dir, "Art", "Teens")
        .await
        .unwrap();
    let original_row = ResultStore::open(ResultStore::path_for(&results_dir))
        .unwrap()
        .records()[0]
        .clone();

    let summary = processor
        .run(&[first_image, second_image], &results_dir, "Art", "Teens")
        .await
        .unwrap();

    assert_eq!(summary.processed_count, 1);
    assert_eq!(processor.backend().calls(), 2);

    let store = ResultStore::open(&summary.store_path).unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.records()[0], original_row);
    assert_eq!(store.records()[1].filename, "second.png");
}

#[tokio::test]
async fn test_store_grows_by_one_row_per_image() {
    let dir = tempfile::tempdir().unwrap();
    let images: Vec<PathBuf> = (0..4)
        .map(|i| write_image(&dir.path().join(format!("page{}.png", i)), 12, 12))
        .collect();
    let results_dir = dir.path().join("results");
    let store_path = ResultStore::path_for(&results_dir);

    // 每次调用时读取磁盘上的结果表，记录已保存的行
    let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let backend = FakeBackend::new({
        let seen = Arc::clone(&seen);
        let store_path = store_path.clone();
        move |n, _| {
            let filenames = ResultStore::open(&store_path)?
                .records()
                .iter()
                .map(|r| r.filename.clone())
                .collect();
            seen.lock().unwrap().push(filenames);
            Ok(format!("Page {}", n))
        }
    });

    let processor = BatchProcessor::new(test_config(dir.path()), backend);
    let summary = processor
        .run(&images, &results_dir, "History", "Adults")
        .await
        .unwrap();
    assert_eq!(summary.processed_count, 4);

    let seen = seen.lock().unwrap();
    let counts: Vec<usize> = seen.iter().map(Vec::len).collect();
    assert_eq!(counts, vec![0, 1, 2, 3]);
    for (i, filenames) in seen.iter().enumerate() {
        let expected: Vec<String> = (0..i).map(|j| format!("page{}.png", j)).collect();
        assert_eq!(filenames, &expected);
    }

    let store = ResultStore::open(&store_path).unwrap();
    let names: HashSet<&str> = store.records().iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(store.len(), 4);
    assert_eq!(names.len(), 4);
}

#[tokio::test]
async fn test_failed_saves_do_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let images: Vec<PathBuf> = (0..3)
        .map(|i| write_image(&dir.path().join(format!("shot{}.png", i)), 12, 12))
        .collect();
    let results_dir = dir.path().join("results");
    let store_path = ResultStore::path_for(&results_dir);

    // 第 1 张之后结果表路径被目录占用，所有写入方式都会失败；
    // 第 3 张时恢复，最后一次保存应包含全部记录
    let backend = FakeBackend::new({
        let store_path = store_path.clone();
        move |n, _| {
            match n {
                1 => std::fs::create_dir_all(&store_path)?,
                3 => std::fs::remove_dir(&store_path)?,
                _ => {}
            }
            Ok(format!("Shot {}", n))
        }
    });

    let processor = BatchProcessor::new(test_config(dir.path()), backend);
    let summary = processor
        .run(&images, &results_dir, "Art", "Teens")
        .await
        .unwrap();

    assert_eq!(summary.processed_count, 3);
    assert_eq!(summary.failed_count, 0);
    assert_eq!(processor.backend().calls(), 3);

    let store = ResultStore::open(&store_path).unwrap();
    let names: Vec<&str> = store.records().iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, vec!["shot0.png", "shot1.png", "shot2.png"]);
}

#[tokio::test]
async fn test_batch_finishes_when_every_save_fails() {
    let dir = tempfile::tempdir().unwrap();
    let images: Vec<PathBuf> = (0..3)
        .map(|i| write_image(&dir.path().join(format!("scan{}.png", i)), 12, 12))
        .collect();
    let results_dir = dir.path().join("results");
    let store_path = ResultStore::path_for(&results_dir);

    let backend = FakeBackend::new({
        let store_path = store_path.clone();
        move |n, _| {
            std::fs::create_dir_all(&store_path)?;
            Ok(format!("Scan {}", n))
        }
    });

    let processor = BatchProcessor::new(test_config(dir.path()), backend);
    let summary = processor
        .run(&images, &results_dir, "Art", "Teens")
        .await
        .unwrap();

    assert_eq!(summary.processed_count, images.len());
    assert_eq!(processor.backend().calls(), images.len());
    assert!(store_path.is_dir());
    // 失败的原子写入不留下临时文件
    let entries: Vec<_> = std::fs::read_dir(&results_dir).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_duplicate_filenames_get_one_row() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("x")).unwrap();
    std::fs::create_dir_all(dir.path().join("y")).unwrap();
    let images = vec![
        write_image(&dir.path().join("x/same.png"), 10, 10),
        write_image(&dir.path().join("y/same.png"), 12, 12),
    ];

    let processor = BatchProcessor::new(test_config(dir.path()), FakeBackend::always_ok());
    let summary = processor
        .run(&images, &dir.path().join("results"), "Art", "Teens")
        .await
        .unwrap();

    assert_eq!(summary.processed_count, 1);
    let store = ResultStore::open(&summary.store_path).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.records()[0].width, 10);
}

#[tokio::test]
async fn test_missing_credential_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(&dir.path().join("a.png"), 10, 10);
    let results_dir = dir.path().join("results");

    let config = Config {
        openai_api_key: None,
        ..test_config(dir.path())
    };
    let processor = BatchProcessor::new(config, FakeBackend::always_ok());

    let err = processor
        .run(&[image], &results_dir, "Biology", "Grade 5")
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(processor.backend().calls(), 0);
    assert!(!ResultStore::path_for(&results_dir).exists());
}

#[tokio::test(start_paused = true)]
async fn test_total_failure_still_writes_one_row_per_image() {
    let dir = tempfile::tempdir().unwrap();
    let images: Vec<PathBuf> = (0..4)
        .map(|i| write_image(&dir.path().join(format!("img{}.bmp", i)), 8, 8))
        .collect();

    let processor = BatchProcessor::new(
        test_config(dir.path()),
        FakeBackend::new(|_, _| anyhow::bail!("connection refused")),
    );
    let summary = processor
        .run(&images, &dir.path().join("results"), "Physics", "Grade 9")
        .await
        .unwrap();

    assert_eq!(summary.processed_count, 4);
    assert_eq!(summary.failed_count, 4);
    assert_eq!(processor.backend().calls(), 12);

    let store = ResultStore::open(&summary.store_path).unwrap();
    assert_eq!(store.len(), 4);
    for row in store.records() {
        assert!(row
            .description
            .starts_with("Error generating description after 3 attempts"));
        assert_eq!(row.format, "BMP");
    }
}

#[tokio::test(start_paused = true)]
async fn test_image_deadline_records_timeout_row() {
    let dir = tempfile::tempdir().unwrap();
    let slow = write_image(&dir.path().join("slow.png"), 10, 10);

    let config = Config {
        image_deadline_secs: Some(30),
        ..test_config(dir.path())
    };
    let mut backend = FakeBackend::always_ok();
    backend.delay = Some(Duration::from_secs(3600));

    let processor = BatchProcessor::new(config, backend);
    let summary = processor
        .run(&[slow], &dir.path().join("results"), "Maths", "school students")
        .await
        .unwrap();

    assert_eq!(summary.failed_count, 1);
    let store = ResultStore::open(&summary.store_path).unwrap();
    assert_eq!(store.records()[0].status, DescriptionStatus::TimedOut);
    assert!(store.records()[0].description.contains("timed out"));
}

#[tokio::test]
async fn test_blank_context_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(&dir.path().join("a.png"), 10, 10);

    let processor = BatchProcessor::new(test_config(dir.path()), FakeBackend::always_ok());
    let summary = processor
        .run(&[image], &dir.path().join("results"), "", "  ")
        .await
        .unwrap();

    let store = ResultStore::open(&summary.store_path).unwrap();
    assert_eq!(store.records()[0].subject, "General Subject");
    assert_eq!(store.records()[0].audience, "Students");

    let request = &processor.backend().requests()[0];
    assert!(request.user_message.contains("Students"));
    assert!(request.system_message.contains("General Subject"));
}

#[tokio::test]
async fn test_submit_archive_job_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("bundle.zip");

    let mut png = std::io::Cursor::new(Vec::new());
    RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]))
        .write_to(&mut png, image::ImageFormat::Png)
        .unwrap();
    {
        let file = std::fs::File::create(&archive_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for name in ["cells/mitosis.png", "notes.txt", "leaf.PNG"] {
            writer.start_file(name, options).unwrap();
            writer.write_all(png.get_ref()).unwrap();
        }
        writer.finish().unwrap();
    }

    let app = App::with_backend(test_config(dir.path()), FakeBackend::always_ok());
    let receipt = app
        .submit(&[archive_path], Some("Biology"), None)
        .await
        .unwrap();

    assert!(receipt.success);
    assert_eq!(receipt.total_images, 2);
    assert_eq!(receipt.message, "Successfully processed 2 images");

    let job_id = receipt.job_id.to_string();
    assert_eq!(
        app.status(&job_id).unwrap(),
        JobStatus::Completed {
            excel_file: "descriptions.xlsx".to_string()
        }
    );

    let artifact = app.download(&job_id).unwrap().unwrap();
    assert_eq!(artifact.download_name, "image_descriptions.xlsx");
    let store = ResultStore::open(&artifact.path).unwrap();
    let names: Vec<&str> = store.records().iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, vec!["mitosis.png", "leaf.PNG"]);
    assert!(store.records().iter().all(|r| r.audience == "Students"));
}

#[tokio::test]
async fn test_submit_filters_unsupported_files() {
    let dir = tempfile::tempdir().unwrap();
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, b"hello").unwrap();

    let app = App::with_backend(test_config(dir.path()), FakeBackend::always_ok());
    let err = app.submit(&[notes.clone()], None, None).await.unwrap_err();
    assert!(err.to_string().contains("No valid image files found"));

    let image = write_image(&dir.path().join("ok.jpg"), 10, 10);
    let receipt = app.submit(&[notes, image], None, None).await.unwrap();
    assert_eq!(receipt.total_images, 1);
    assert_eq!(app.processor().backend().calls(), 1);
}

#[tokio::test]
async fn test_submit_without_credential_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(&dir.path().join("a.png"), 10, 10);
    let config = Config {
        openai_api_key: None,
        ..test_config(dir.path())
    };

    let app = App::with_backend(config, FakeBackend::always_ok());
    let err = app.submit(&[image], None, None).await.unwrap_err();

    assert!(err.is_configuration());
    assert!(!dir.path().join("outputs").exists());
}

#[tokio::test]
#[ignore] // 默认忽略，需要手动运行：cargo test -- --ignored
async fn test_describe_with_real_api() {
    image_describer::logger::init();

    let dir = tempfile::tempdir().unwrap();
    let image = write_image(&dir.path().join("board.png"), 64, 64);

    let processor = BatchProcessor::from_config(Config::from_env()).expect("需要设置 OPENAI_API_KEY");
    let summary = processor
        .run(&[image], &dir.path().join("results"), "Mathematics", "school students")
        .await
        .expect("处理失败");

    assert_eq!(summary.processed_count, 1);
    assert_eq!(summary.failed_count, 0, "描述生成应该成功");
}
