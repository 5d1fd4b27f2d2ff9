//! End-to-end ingestion of recorded notices

mod helpers;

use std::sync::Arc;

use helpers::{fixture, ingestor, FakeFetcher, FAKE_MAP_CENTER};
use skyalert_common::time::parse_dateobs;
use skyalert_gcn::consumer::NoticeHandler;
use skyalert_gcn::contour::Geometry;
use skyalert_gcn::db::{events, localizations, notices};
use skyalert_gcn::error::GcnError;
use skyalert_gcn::ingest::LocalizationOutcome;
use skyalert_gcn::resolver::{Unavailable, CHI2_PPF_95};
use skyalert_gcn::voevent::NoticeType;

#[tokio::test]
async fn test_gw_preliminary_stores_event_notice_and_skymap() {
    let fetcher = Arc::new(FakeFetcher::default());
    let (ingestor, pool) = ingestor(fetcher.clone()).await;
    let payload = fixture("lvc_preliminary.xml");

    let report = ingestor.ingest(&payload).await.unwrap();

    let dateobs = parse_dateobs("2019-04-25T08:18:05").unwrap();
    assert_eq!(report.dateobs, dateobs);
    assert_eq!(report.ivorn, "ivo://gwnet/LVC#S190425z-1-Preliminary");
    assert_eq!(report.notice_type, NoticeType::LvcPreliminary);
    assert_eq!(report.tags, vec!["LVC", "GW", "BNS", "AllSky"]);
    match &report.localization {
        LocalizationOutcome::Stored { name, .. } => assert_eq!(name, "bayestar.fits.gz"),
        other => panic!("expected stored localization, got {:?}", other),
    }
    assert_eq!(
        fetcher.urls(),
        vec!["https://gracedb.ligo.org/api/superevents/S190425z/files/bayestar.fits.gz"]
    );

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(events::load_tags(&mut conn, &dateobs).await.unwrap(), report.tags);

    let notice = notices::load_notice(&mut conn, &report.ivorn).await.unwrap().unwrap();
    assert_eq!(notice.notice_type, "LVC_PRELIMINARY");
    assert_eq!(notice.stream, "LVC");
    assert_eq!(notice.date.as_deref(), Some("2019-04-25T08:18:26"));
    assert_eq!(notice.content, payload);

    let stored = localizations::load_localizations_for_event(&mut conn, &dateobs).await.unwrap();
    assert_eq!(stored.len(), 1);
    let localization = &stored[0];
    assert_eq!(localization.localization_name, "bayestar.fits.gz");

    let total: f64 = localization.flat_2d().iter().sum();
    assert!((total - 1.0).abs() < 1e-6, "flat_2d sums to {}", total);

    let contour = localization.contour.as_ref().expect("contour stored");
    let levels: Vec<u8> = contour.features.iter().map(|f| f.properties.credible_level).collect();
    assert_eq!(levels, vec![0, 50, 90]);
    match &contour.features[0].geometry {
        Geometry::Point { coordinates } => {
            assert!((coordinates[0] - FAKE_MAP_CENTER.0).abs() < 0.5);
            assert!((coordinates[1] - FAKE_MAP_CENTER.1).abs() < 0.5);
        }
        other => panic!("expected point, got {:?}", other),
    }
    for feature in &contour.features[1..] {
        match &feature.geometry {
            Geometry::MultiLineString { coordinates } => assert!(!coordinates.is_empty()),
            other => panic!("expected lines, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_reingesting_same_notice_is_idempotent() {
    let fetcher = Arc::new(FakeFetcher::default());
    let (ingestor, pool) = ingestor(fetcher.clone()).await;
    let payload = fixture("lvc_preliminary.xml");

    let first = ingestor.ingest(&payload).await.unwrap();
    let second = ingestor.ingest(&payload).await.unwrap();

    assert_eq!(first.localization, second.localization);
    assert_eq!(fetcher.calls(), 1, "stored skymap must not be downloaded again");

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(events::count_events(&mut conn).await.unwrap(), 1);
    assert_eq!(events::load_tags(&mut conn, &first.dateobs).await.unwrap(), first.tags);
    assert_eq!(
        notices::load_notices_for_event(&mut conn, &first.dateobs).await.unwrap().len(),
        1
    );
    assert_eq!(
        localizations::load_localizations_for_event(&mut conn, &first.dateobs)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_retraction_tags_event_without_localization() {
    let fetcher = Arc::new(FakeFetcher::default());
    let (ingestor, pool) = ingestor(fetcher.clone()).await;

    let report = ingestor.ingest(&fixture("lvc_retraction.xml")).await.unwrap();

    assert_eq!(report.notice_type, NoticeType::LvcRetraction);
    assert_eq!(report.tags, vec!["LVC", "GW", "retracted"]);
    assert_eq!(report.localization, LocalizationOutcome::Unavailable(Unavailable::Retracted));
    assert_eq!(fetcher.calls(), 0);

    let mut conn = pool.acquire().await.unwrap();
    assert!(localizations::load_localizations_for_event(&mut conn, &report.dateobs)
        .await
        .unwrap()
        .is_empty());
    let notice = notices::load_notice(&mut conn, &report.ivorn).await.unwrap().unwrap();
    assert_eq!(notice.notice_type, "LVC_RETRACTION");
}

#[tokio::test]
async fn test_retraction_after_preliminary_merges_into_same_event() {
    let fetcher = Arc::new(FakeFetcher::default());
    let (ingestor, pool) = ingestor(fetcher).await;

    let preliminary = ingestor.ingest(&fixture("lvc_preliminary.xml")).await.unwrap();
    let retraction = ingestor.ingest(&fixture("lvc_retraction.xml")).await.unwrap();
    assert_eq!(preliminary.dateobs, retraction.dateobs);

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(events::count_events(&mut conn).await.unwrap(), 1);
    assert_eq!(
        events::load_tags(&mut conn, &preliminary.dateobs).await.unwrap(),
        vec!["LVC", "GW", "BNS", "AllSky", "retracted"]
    );
    assert_eq!(
        notices::load_notices_for_event(&mut conn, &preliminary.dateobs)
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        localizations::load_localizations_for_event(&mut conn, &preliminary.dateobs)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_fermi_final_position_downloads_healpix_map() {
    let fetcher = Arc::new(FakeFetcher::default());
    let (ingestor, _pool) = ingestor(fetcher.clone()).await;

    let report = ingestor.ingest(&fixture("fermi_gbm_fin_pos.xml")).await.unwrap();

    assert_eq!(report.notice_type, NoticeType::FermiGbmFinPos);
    assert_eq!(report.dateobs, parse_dateobs("2019-04-25T02:07:55").unwrap());
    assert_eq!(report.tags, vec!["Fermi", "GRB", "short"]);
    assert_eq!(
        fetcher.urls(),
        vec!["https://heasarc.gsfc.nasa.gov/FTP/fermi/data/gbm/triggers/2019/bn190425089/quicklook/glg_healpix_all_bn190425089.fit"]
    );
    match report.localization {
        LocalizationOutcome::Stored { name, .. } => assert_eq!(name, "glg_healpix_all_bn190425089.fit"),
        other => panic!("expected stored localization, got {:?}", other),
    }
}

#[tokio::test]
async fn test_amon_cone_radius_rescaled_to_one_sigma() {
    let fetcher = Arc::new(FakeFetcher::default());
    let (ingestor, pool) = ingestor(fetcher.clone()).await;
    let payload = fixture("amon_icecube_hese.xml");

    let report = ingestor.ingest(&payload).await.unwrap();

    assert_eq!(report.notice_type, NoticeType::AmonIcecubeHese);
    assert_eq!(report.tags, vec!["AMON", "transient"]);
    assert_eq!(fetcher.calls(), 0);

    let expected = format!("{:.5}_{:.5}_{:.5}", 343.26, 10.73, 4.0 / CHI2_PPF_95);
    match &report.localization {
        LocalizationOutcome::Stored { name, .. } => assert_eq!(name, &expected),
        other => panic!("expected stored localization, got {:?}", other),
    }

    let mut conn = pool.acquire().await.unwrap();
    let stored = localizations::load_localizations_for_event(&mut conn, &report.dateobs).await.unwrap();
    assert_eq!(stored.len(), 1);
    let total: f64 = stored[0].flat_2d().iter().sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert!(stored[0].contour.is_some());
}

#[tokio::test]
async fn test_swift_cone_localization() {
    let fetcher = Arc::new(FakeFetcher::default());
    let (ingestor, _pool) = ingestor(fetcher).await;

    let report = ingestor.ingest(&fixture("swift_bat_grb_pos_ack.xml")).await.unwrap();

    assert_eq!(report.notice_type, NoticeType::SwiftBatGrbPosAck);
    assert_eq!(report.tags, vec!["SWIFT", "GRB"]);
    match report.localization {
        LocalizationOutcome::Stored { name, .. } => assert_eq!(name, "290.37000_48.67000_0.05000"),
        other => panic!("expected stored localization, got {:?}", other),
    }
}

#[tokio::test]
async fn test_skymap_status_follow_up() {
    let fetcher = Arc::new(FakeFetcher::default());
    let (ingestor, pool) = ingestor(fetcher).await;

    let gw = fixture("lvc_preliminary.xml");
    let cone = fixture("amon_icecube_hese.xml");
    let retraction = fixture("lvc_retraction.xml");
    ingestor.handle(&gw, "gcn.classic.voevent.LVC_PRELIMINARY").await.unwrap();
    ingestor.handle(&cone, "gcn.classic.voevent.AMON_ICECUBE_HESE").await.unwrap();
    ingestor.handle(&retraction, "gcn.classic.voevent.LVC_RETRACTION").await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let gw_notice = notices::load_notice(&mut conn, "ivo://gwnet/LVC#S190425z-1-Preliminary")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gw_notice.skymap_status.as_deref(), Some("available"));

    let cone_notice = notices::load_notice(
        &mut conn,
        "ivo://nasa.gsfc.gcn/AMON#ICECUBE_HESE_Event2019-06-19T13:14:18.04_132910_057049446_0-123",
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(cone_notice.skymap_status.as_deref(), Some("deferred"));

    let retraction_notice = notices::load_notice(&mut conn, "ivo://gwnet/LVC#S190425z-3-Retraction")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retraction_notice.skymap_status, None);
}

#[tokio::test]
async fn test_failed_download_keeps_earlier_steps() {
    let fetcher = Arc::new(FakeFetcher::failing());
    let (ingestor, pool) = ingestor(fetcher).await;
    let payload = fixture("lvc_preliminary.xml");

    let err = ingestor.ingest(&payload).await.unwrap_err();
    assert!(matches!(err, GcnError::SkymapFetch(_)), "got {:?}", err);

    let dateobs = parse_dateobs("2019-04-25T08:18:05").unwrap();
    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(events::count_events(&mut conn).await.unwrap(), 1);
    assert_eq!(events::load_tags(&mut conn, &dateobs).await.unwrap().len(), 4);
    assert!(notices::load_notice(&mut conn, "ivo://gwnet/LVC#S190425z-1-Preliminary")
        .await
        .unwrap()
        .is_some());
    assert!(localizations::load_localizations_for_event(&mut conn, &dateobs)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_invalid_payload_stores_nothing() {
    let fetcher = Arc::new(FakeFetcher::default());
    let (ingestor, pool) = ingestor(fetcher).await;

    let err = ingestor.ingest(b"<not-a-voevent/>").await.unwrap_err();
    assert!(matches!(err, GcnError::SchemaValidation(_)), "got {:?}", err);

    let payload = String::from_utf8(fixture("swift_bat_grb_pos_ack.xml"))
        .unwrap()
        .replace("<ISOTime>2019-06-25T20:02:34.83</ISOTime>", "");
    let err = ingestor.ingest(payload.as_bytes()).await.unwrap_err();
    assert!(matches!(err, GcnError::MissingField(_)), "got {:?}", err);

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(events::count_events(&mut conn).await.unwrap(), 0);
}
