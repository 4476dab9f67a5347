use fisheye_calib::synthetic::distort_image;
use fisheye_calib::{load_model, FisheyeModel, ProjectOptions, UndistortOptions};
use fisheye_core::{GrayImage, GridSize, ImageView};
use nalgebra::{Matrix3, Point2, Point3, Vector4};

const W: usize = 320;
const H: usize = 240;

fn model() -> FisheyeModel {
    let mut model = FisheyeModel::new(GridSize::new(9, 6)).unwrap();
    model.set_calibration(
        Matrix3::new(160.0, 0.0, 159.5, 0.0, 162.0, 119.5, 0.0, 0.0, 1.0),
        Vector4::new(0.04, -0.01, 0.002, 0.0),
    );
    model
}

fn smooth_pattern() -> GrayImage {
    let mut img = GrayImage::new(W, H);
    for y in 0..H {
        for x in 0..W {
            let v = 128.0 + 90.0 * (x as f64 / 9.0).sin() * (y as f64 / 11.0).cos();
            img.data[y * W + x] = v.round() as u8;
        }
    }
    img
}

#[test]
fn undistort_inverts_synthetic_distortion() {
    let model = model();
    let src = smooth_pattern();
    let distorted = distort_image(&src.view().into(), &model.intrinsics(), &model.fisheye_distortion());
    let restored = model
        .undistort(&distorted.view(), &UndistortOptions::default())
        .expect("undistort");

    assert_eq!((restored.width, restored.height, restored.channels), (W, H, 1));
    let mut worst = 0i32;
    for y in H / 4..3 * H / 4 {
        for x in W / 4..3 * W / 4 {
            let a = restored.data[y * W + x] as i32;
            let b = src.data[y * W + x] as i32;
            worst = worst.max((a - b).abs());
        }
    }
    assert!(worst <= 6, "max interior difference {worst}");
}

#[test]
fn undistort_is_idempotent() {
    let model = model();
    let src = smooth_pattern();
    let view: ImageView<'_> = src.view().into();
    let opts = UndistortOptions::default();
    let a = model.undistort(&view, &opts).unwrap();
    let b = model.undistort(&view, &opts).unwrap();
    assert_eq!(a, b);
    assert_eq!(model, self::model());
}

#[test]
fn undistort_honours_output_options() {
    let model = model();
    let src = smooth_pattern();
    let k = model.camera_matrix();
    let half = Matrix3::new(0.5, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 1.0) * k;
    let opts = UndistortOptions {
        output_size: Some((W / 2, H / 2)),
        new_camera_matrix: Some(half),
        border_value: 77,
        ..Default::default()
    };
    let out = model.undistort(&src.view().into(), &opts).unwrap();
    assert_eq!((out.width, out.height), (W / 2, H / 2));

    // a wide new camera pulls in rays beyond the source: corners hit the border value
    let wide = UndistortOptions {
        new_camera_matrix: Some(Matrix3::new(40.0, 0.0, 159.5, 0.0, 40.0, 119.5, 0.0, 0.0, 1.0)),
        border_value: 77,
        ..Default::default()
    };
    let out = model.undistort(&src.view().into(), &wide).unwrap();
    assert_eq!(out.data[0], 77);
}

#[test]
fn projection_agrees_with_undistort_map() {
    let model = model();
    let k = model.intrinsics();
    let map = model.undistort_map((W, H), &UndistortOptions::default()).unwrap();

    for &(qx, qy) in &[(200usize, 150usize), (40, 30), (300, 220), (159, 119)] {
        let depth = 2.5;
        let ray = k.to_normalized(Point2::new(qx as f64, qy as f64));
        let point = Point3::new(ray.x * depth, ray.y * depth, depth);
        let px = model
            .project(vec![point], &ProjectOptions::default())
            .unwrap()
            .into_flat()[0];
        let (mx, my) = map.get(qx, qy);
        assert!((px.x - mx as f64).abs() < 1e-3, "u: {} vs {mx}", px.x);
        assert!((px.y - my as f64).abs() < 1e-3, "v: {} vs {my}", px.y);

        let back = model
            .undistort_pixels(&[px], &UndistortOptions::default())
            .unwrap()[0]
            .expect("invertible");
        assert!((back.x - qx as f64).abs() < 1e-6 && (back.y - qy as f64).abs() < 1e-6);
    }
}

#[test]
fn saved_model_loads_bit_identical() {
    let model = model().with_verbose(false);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("camera.json");
    model.save(&path).unwrap();

    let loaded = load_model(&path).unwrap();
    assert_eq!(loaded.grid(), model.grid());
    assert_eq!(loaded.camera_matrix(), model.camera_matrix());
    assert_eq!(loaded.distortion(), model.distortion());

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"format_version\": 1"));
}

#[test]
fn uncalibrated_model_refuses_to_undistort() {
    let model = FisheyeModel::new(GridSize::new(9, 6)).unwrap();
    let src = smooth_pattern();
    assert!(matches!(
        model.undistort(&src.view().into(), &UndistortOptions::default()),
        Err(fisheye_calib::FisheyeError::NotCalibrated)
    ));
}
