use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

use plateau_buildings::parser::{parse_citygml, parse_citygml_file};
use plateau_buildings::{FeatureCollection, GeoJsonWriter, ParseOptions, ZipHandler};

fn citygml_doc(members: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<core:CityModel xmlns:core="http://www.opengis.net/citygml/2.0"
                xmlns:bldg="http://www.opengis.net/citygml/building/2.0"
                xmlns:gml="http://www.opengis.net/gml">
{}
</core:CityModel>"#,
        members
    )
}

fn building_with_footprint(attributes: &str, pos_list: &str) -> String {
    format!(
        "<core:cityObjectMember><bldg:Building>{}\
         <bldg:lod0FootPrint><gml:MultiSurface><gml:surfaceMember><gml:Polygon>\
         <gml:exterior><gml:LinearRing><gml:posList>{}</gml:posList></gml:LinearRing>\
         </gml:exterior></gml:Polygon></gml:surfaceMember></gml:MultiSurface>\
         </bldg:lod0FootPrint></bldg:Building></core:cityObjectMember>",
        attributes, pos_list
    )
}

fn two_building_doc() -> String {
    // 1棟目は属性つき、2棟目は3D座標だけ
    let first = building_with_footprint(
        "<bldg:measuredHeight uom=\"m\">12.4</bldg:measuredHeight>\
         <bldg:function>共同住宅</bldg:function>\
         <bldg:yearOfConstruction>1985</bldg:yearOfConstruction>",
        "139.740 35.650 0 139.741 35.650 0 139.741 35.651 8 139.740 35.651 8",
    );
    let second = building_with_footprint(
        "",
        "139.742 35.650 2 139.743 35.650 2 139.743 35.651 17 139.742 35.651 17",
    );
    citygml_doc(&format!("{}{}", first, second))
}

#[test]
fn test_citygml_file_to_geojson_workflow() {
    let temp_dir = TempDir::new().unwrap();
    let input_path = temp_dir.path().join("53392546_bldg_6697.gml");
    fs::write(&input_path, two_building_doc()).unwrap();

    // 解析
    let options = ParseOptions {
        source_crs: "EPSG:6697".to_string(),
        ..ParseOptions::default()
    };
    let collection = parse_citygml_file(&input_path, &options).unwrap();

    assert_eq!(collection.len(), 2);
    assert_eq!(collection.candidates_seen, 2);
    assert_eq!(collection.crs, "EPSG:4326");
    assert!(!collection.crs_fallback);

    let first = &collection.features[0];
    assert_eq!(first.height_m, 12.4);
    assert_eq!(first.usage.as_deref(), Some("共同住宅"));
    assert_eq!(first.year, Some(1985));

    // 高さ要素の無い2棟目は z の幅から解決される
    let second = &collection.features[1];
    assert_eq!(second.height_m, 15.0);
    assert_eq!(second.usage, None);
    assert_eq!(second.year, None);

    // JGD2011の緯度経度は実質そのまま通る
    let centroid = first.centroid().unwrap();
    assert!((centroid.x() - 139.7405).abs() < 1e-6);
    assert!((centroid.y() - 35.6505).abs() < 1e-6);

    // GeoJSONに書き出して読み返す
    let output_path = temp_dir.path().join("buildings.geojson");
    let writer = GeoJsonWriter::new();
    writer.write(&collection, &output_path).unwrap();

    let contents = fs::read_to_string(&output_path).unwrap();
    let fc = match contents.parse::<geojson::GeoJson>().unwrap() {
        geojson::GeoJson::FeatureCollection(fc) => fc,
        other => panic!("Expected FeatureCollection, got {:?}", other),
    };

    assert_eq!(fc.features.len(), 2);
    let foreign = fc.foreign_members.as_ref().unwrap();
    assert_eq!(foreign.get("sourceCrs").unwrap().as_str(), Some("EPSG:6697"));
    assert_eq!(foreign.get("crsFallback").unwrap().as_bool(), Some(false));

    let properties = fc.features[0].properties.as_ref().unwrap();
    assert_eq!(properties.get("height_m").unwrap().as_f64(), Some(12.4));
    assert_eq!(properties.get("year").unwrap().as_i64(), Some(1985));
}

#[test]
fn test_plane_rectangular_source_is_reprojected() {
    // IX系原点まわりの±50mの正方形
    let xml = citygml_doc(&building_with_footprint(
        "",
        "-50 -50 50 -50 50 50 -50 50",
    ));

    let options = ParseOptions {
        source_crs: "EPSG:6677".to_string(),
        ..ParseOptions::default()
    };
    let collection = parse_citygml(&xml, &options).unwrap();

    assert_eq!(collection.len(), 1);
    assert_eq!(collection.crs, "EPSG:4326");
    assert!(!collection.crs_fallback);

    let centroid = collection.features[0].centroid().unwrap();
    assert!(
        (centroid.x() - 139.83333333333334).abs() < 1e-4,
        "lon = {}",
        centroid.x()
    );
    assert!((centroid.y() - 36.0).abs() < 1e-4, "lat = {}", centroid.y());
}

#[test]
fn test_unknown_crs_survives_as_fallback() {
    let xml = citygml_doc(&building_with_footprint("", "0 0 1 0 1 1 0 1"));

    let options = ParseOptions {
        source_crs: "EPSG:99999".to_string(),
        ..ParseOptions::default()
    };
    let collection = parse_citygml(&xml, &options).unwrap();

    // 変換に失敗しても結果は返り、座標はそのまま残る
    assert_eq!(collection.len(), 1);
    assert!(collection.crs_fallback);
    assert_eq!(collection.crs, "EPSG:99999");
    let centroid = collection.features[0].centroid().unwrap();
    assert!((centroid.x() - 0.5).abs() < 1e-9);

    // フラグはGeoJSONまで伝わる
    let temp_dir = TempDir::new().unwrap();
    let output_path = temp_dir.path().join("fallback.geojson");
    GeoJsonWriter::new()
        .write(&collection, &output_path)
        .unwrap();

    let contents = fs::read_to_string(&output_path).unwrap();
    let fc = match contents.parse::<geojson::GeoJson>().unwrap() {
        geojson::GeoJson::FeatureCollection(fc) => fc,
        other => panic!("Expected FeatureCollection, got {:?}", other),
    };
    let foreign = fc.foreign_members.as_ref().unwrap();
    assert_eq!(foreign.get("crsFallback").unwrap().as_bool(), Some(true));
}

fn create_zip(path: &PathBuf, entries: &[(&str, &str)]) {
    let file = fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, contents) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn test_zip_merge_workflow() {
    let temp_dir = TempDir::new().unwrap();
    let zip_path = temp_dir.path().join("13100_tokyo.zip");

    let first = citygml_doc(&building_with_footprint(
        "<bldg:measuredHeight>5</bldg:measuredHeight>",
        "0 0 1 0 1 1 0 1",
    ));
    let second = citygml_doc(&format!(
        "{}{}",
        building_with_footprint("<bldg:measuredHeight>7</bldg:measuredHeight>", "2 0 3 0 3 1 2 1"),
        building_with_footprint("<bldg:measuredHeight>9</bldg:measuredHeight>", "4 0 5 0 5 1 4 1"),
    ));
    create_zip(
        &zip_path,
        &[
            ("13100_tokyo/udx/bldg/53392546_bldg_6697.gml", first.as_str()),
            ("13100_tokyo/udx/bldg/53392547_bldg_6697.gml", second.as_str()),
        ],
    );

    let handler = ZipHandler::new(&zip_path);
    let results = handler.process_all(&ParseOptions::default()).unwrap();
    assert_eq!(results.len(), 2);

    // エントリ順のままひとつに結合する
    let merged = FeatureCollection::merge(results.into_iter().map(|(_, c)| c).collect());
    assert_eq!(merged.len(), 3);
    assert_eq!(merged.candidates_seen, 3);
    let heights: Vec<f64> = merged.features.iter().map(|f| f.height_m).collect();
    assert_eq!(heights, vec![5.0, 7.0, 9.0]);

    let output_path = temp_dir.path().join("13100_tokyo.geojson");
    GeoJsonWriter::new().write(&merged, &output_path).unwrap();

    let contents = fs::read_to_string(&output_path).unwrap();
    let fc = match contents.parse::<geojson::GeoJson>().unwrap() {
        geojson::GeoJson::FeatureCollection(fc) => fc,
        other => panic!("Expected FeatureCollection, got {:?}", other),
    };
    assert_eq!(fc.features.len(), 3);
}
