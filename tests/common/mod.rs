//! Shared fixtures: deterministic embedding generators and a service in a
//! temp directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex, mpsc};

use jobmatch::config::IndexKindSetting;
use jobmatch::{
    Embedder, EmbedderOptions, EmbeddingGenerator, GeneratorFactory, JobSearchService, JobStore,
    NewJobPosting, Settings, VectorDimension, VectorError,
};
use tempfile::TempDir;

/// Concepts the keyword generator recognises, one dimension each.
///
/// Keywords with a space match as phrases, others as whole words.
const CONCEPTS: &[&[&str]] = &[
    &["python"],
    &["ml", "machine learning", "pytorch"],
    &["frontend", "react"],
    &["backend", "server"],
    &["developer", "engineer"],
];

/// Binary concept features, L2-normalized.
///
/// Texts with no known concept land on an extra catch-all dimension.
pub struct KeywordEmbeddingGenerator;

impl KeywordEmbeddingGenerator {
    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let mut vector = vec![0.0f32; CONCEPTS.len() + 1];
        for (dim, keywords) in CONCEPTS.iter().enumerate() {
            let hit = keywords.iter().any(|keyword| {
                if keyword.contains(' ') {
                    lower.contains(keyword)
                } else {
                    words.contains(keyword)
                }
            });
            if hit {
                vector[dim] = 1.0;
            }
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[CONCEPTS.len()] = 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        vector.iter_mut().for_each(|v| *v /= norm);
        vector
    }
}

impl EmbeddingGenerator for KeywordEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|text| Self::vector(text)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        VectorDimension::new(CONCEPTS.len() + 1).expect("non-zero dimension")
    }

    fn model_id(&self) -> &str {
        "keyword-concepts"
    }
}

/// Bag of hashed words, for corpora larger than the concept list can tell apart.
pub struct HashedWordsGenerator {
    dimension: usize,
}

impl HashedWordsGenerator {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, word: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dimension as u64) as usize
    }
}

impl EmbeddingGenerator for HashedWordsGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for word in text.split_whitespace() {
                    vector[self.bucket(&word.to_lowercase())] += 1.0;
                }
                let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
                vector.iter_mut().for_each(|v| *v /= norm);
                vector
            })
            .collect())
    }

    fn dimension(&self) -> VectorDimension {
        VectorDimension::new(self.dimension).expect("non-zero dimension")
    }

    fn model_id(&self) -> &str {
        "hashed-words"
    }
}

/// Fails on any text containing `poison`.
pub struct PoisonedGenerator;

impl EmbeddingGenerator for PoisonedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.iter().any(|text| text.contains("poison")) {
            return Err(VectorError::EmbeddingFailed("model rejected input".to_string()));
        }
        KeywordEmbeddingGenerator.generate_embeddings(texts)
    }

    fn dimension(&self) -> VectorDimension {
        KeywordEmbeddingGenerator.dimension()
    }

    fn model_id(&self) -> &str {
        "keyword-concepts"
    }
}

/// Blocks on texts containing `slow` until the test releases it.
///
/// Like the fastembed backend, each instance serializes its calls behind a
/// session lock, and the lock stays held while a call is blocked.
pub struct GatedGenerator {
    session: Mutex<()>,
    gate: Arc<GateChannels>,
}

struct GateChannels {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

/// Test-side handles of a [`GatedGenerator`].
pub struct Gate {
    pub entered: mpsc::Receiver<()>,
    pub release: mpsc::Sender<()>,
}

impl GatedGenerator {
    /// A factory producing a new instance per call, all behind one gate.
    pub fn factory() -> (GeneratorFactory, Gate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gate = Arc::new(GateChannels {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });

        let factory: GeneratorFactory = Arc::new(move || {
            Ok(Arc::new(GatedGenerator {
                session: Mutex::new(()),
                gate: Arc::clone(&gate),
            }) as Arc<dyn EmbeddingGenerator>)
        });
        (
            factory,
            Gate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl EmbeddingGenerator for GatedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        let _session = self.session.lock().unwrap();
        if texts.iter().any(|text| text.contains("slow")) {
            let _ = self.gate.entered.lock().unwrap().send(());
            let _ = self.gate.release.lock().unwrap().recv();
        }
        KeywordEmbeddingGenerator.generate_embeddings(texts)
    }

    fn dimension(&self) -> VectorDimension {
        KeywordEmbeddingGenerator.dimension()
    }

    fn model_id(&self) -> &str {
        "keyword-concepts"
    }
}

/// A service whose store and index live in a temp directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub service: JobSearchService,
}

impl TestEnv {
    pub fn new(kind: IndexKindSetting, generator: Arc<dyn EmbeddingGenerator>) -> Self {
        let embedder = Embedder::with_generator(generator, EmbedderOptions::default());
        Self::with_embedder(kind, embedder)
    }

    /// Service whose embedder creates a generator per model load.
    pub fn with_factory(kind: IndexKindSetting, factory: GeneratorFactory) -> Self {
        Self::with_embedder(kind, Embedder::new(factory, EmbedderOptions::default()))
    }

    fn with_embedder(kind: IndexKindSetting, embedder: Embedder) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let service = service_with(&dir, kind, embedder);
        Self { dir, service }
    }

    /// Concept generator with a flat index, for the small corpora.
    pub fn flat() -> Self {
        Self::new(IndexKindSetting::Flat, Arc::new(KeywordEmbeddingGenerator))
    }

    /// A second service over the same directory, as another process would open it.
    pub fn reopen(&self, kind: IndexKindSetting, generator: Arc<dyn EmbeddingGenerator>) -> JobSearchService {
        service_in(&self.dir, kind, generator)
    }

    pub fn insert(&self, job_id: i64, title: &str, description: &str) {
        self.service
            .store()
            .upsert_posting(&NewJobPosting::new(job_id, title, description))
            .expect("Failed to insert posting");
    }

    pub fn index_dir(&self) -> PathBuf {
        self.dir.path().join("index")
    }
}

pub fn settings_in(dir: &TempDir, kind: IndexKindSetting) -> Settings {
    let mut settings = Settings::default();
    settings.workspace_root = Some(dir.path().to_path_buf());
    settings.store.database_path = dir.path().join("jobs.db");
    settings.index.path = dir.path().join("index");
    settings.index.kind = kind;
    settings
}

fn service_in(
    dir: &TempDir,
    kind: IndexKindSetting,
    generator: Arc<dyn EmbeddingGenerator>,
) -> JobSearchService {
    let embedder = Embedder::with_generator(generator, EmbedderOptions::default());
    service_with(dir, kind, embedder)
}

fn service_with(dir: &TempDir, kind: IndexKindSetting, embedder: Embedder) -> JobSearchService {
    let settings = settings_in(dir, kind);
    let store = JobStore::open(settings.database_path()).expect("Failed to open store");
    JobSearchService::with_components(settings, Arc::new(store), Arc::new(embedder))
}

/// The three postings of the ranking scenario.
pub fn seed_three_postings(env: &TestEnv) {
    env.insert(1, "Backend Engineer", "Python backend engineer");
    env.insert(2, "Frontend Developer", "Frontend React developer");
    env.insert(3, "ML Engineer", "Machine learning engineer, Python, PyTorch");
}
