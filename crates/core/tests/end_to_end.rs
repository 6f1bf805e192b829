use eligibility_rag_core::{
    CharacterNgramEmbedder, Collection, DocumentExtractor, DocumentType, IngestLock,
    IngestionDriver, LocalVectorStore, Retriever, SearchQuery, VectorIndex,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn write_single_line_pdf(path: &Path, line: &str) -> TestResult {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(line)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path)?;
    Ok(())
}

fn seed_documents(root: &Path) -> TestResult {
    let application = root.join("APP-000001");
    fs::create_dir_all(&application)?;
    write_single_line_pdf(
        &application.join("resume.pdf"),
        "I have 5 years of experience in banking.",
    )?;
    fs::write(
        application.join("bank_statement.txt"),
        "Opening balance 8,200 AED. Salary credit 14,000 AED on the 25th. Rent debit 6,500 AED.",
    )?;
    fs::write(
        application.join("credit_report.json"),
        r#"{"credit_score": 702, "open_accounts": 3, "defaults": 0}"#,
    )?;
    fs::write(application.join("metadata.json"), r#"{"ignored": true}"#)?;

    let other = root.join("APP-000002");
    fs::create_dir_all(&other)?;
    fs::write(
        other.join("employment_letter.txt"),
        "This letter confirms employment as a nurse since 2019.",
    )?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn ingest_then_query_finds_the_resume_chunk() -> TestResult {
    let workspace = tempdir()?;
    let root = workspace.path().join("documents");
    seed_documents(&root)?;

    let store = Arc::new(LocalVectorStore::open(workspace.path().join("vector_store"))?);
    let extractor = DocumentExtractor::default();
    let embedder = Arc::new(CharacterNgramEmbedder::default());

    let _lock = IngestLock::acquire(workspace.path())?;
    let report = IngestionDriver::new(
        &extractor,
        embedder.as_ref(),
        store.as_ref(),
        Duration::from_secs(10),
    )
    .run(&root)
    .await?;

    assert_eq!(report.applications, 2);
    assert_eq!(report.files_discovered, 4);
    assert_eq!(report.files_processed, 4, "failures: {:?}", report.failures);
    assert_eq!(report.chunks_by_type.get(&DocumentType::Resume), Some(&1));

    let resume_chunks = store.query(Collection::Resumes, &[0.0; 384], 10, None).await?;
    assert_eq!(resume_chunks.len(), 1);
    assert_eq!(resume_chunks[0].chunk.chunk_index, 0);
    assert_eq!(resume_chunks[0].chunk.total_chunks, 1);

    let retriever = Retriever::new(embedder, None, store);
    let results = retriever
        .hybrid_search(&SearchQuery::new("years of banking experience", 3).without_rerank())
        .await?;

    let resume = results
        .iter()
        .find(|result| result.metadata.document_type == DocumentType::Resume)
        .expect("resume chunk is in the top-k results");
    assert!(resume.keyword_score >= 0.5);
    assert!(resume.text.contains("5 years of experience in banking"));
    for result in &results {
        assert!((0.0..=1.0).contains(&result.hybrid_score));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reingesting_unchanged_documents_is_idempotent() -> TestResult {
    let workspace = tempdir()?;
    let root = workspace.path().join("documents");
    seed_documents(&root)?;

    let store = LocalVectorStore::open(workspace.path().join("vector_store"))?;
    let extractor = DocumentExtractor::default();
    let embedder = CharacterNgramEmbedder::default();
    let driver = IngestionDriver::new(&extractor, &embedder, &store, Duration::from_secs(10));

    let first = driver.run(&root).await?;
    let second = driver.run(&root).await?;

    assert_eq!(first.collection_counts, second.collection_counts);
    assert_eq!(first.total_chunks(), second.total_chunks());
    assert!(second.collection_counts.values().sum::<usize>() > 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn application_filter_limits_results() -> TestResult {
    let workspace = tempdir()?;
    let root = workspace.path().join("documents");
    seed_documents(&root)?;

    let store = Arc::new(LocalVectorStore::open(workspace.path().join("vector_store"))?);
    let extractor = DocumentExtractor::default();
    let embedder = Arc::new(CharacterNgramEmbedder::default());
    IngestionDriver::new(
        &extractor,
        embedder.as_ref(),
        store.as_ref(),
        Duration::from_secs(10),
    )
    .run(&root)
    .await?;

    let retriever = Retriever::new(embedder, None, store);
    let context = retriever
        .get_rag_context("employment confirmation", Some("APP-000002"), 5)
        .await?;

    assert!(context.starts_with("[Document 1: employment_letter]\n"));
    assert!(!context.contains("[Document 2:"));
    Ok(())
}
