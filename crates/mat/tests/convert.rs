use compute::{DeviceType, ErrorKind};
use mat::{
    utils, ArmMatConverter, BorderType, ColorConversion, CpuMatConverter, CropParam, Interpolation, Mat,
    MatConverterAcc, MatConverterRegistry, MatType, PasteParam, PasteType, ResizeParam, WarpAffineParam,
};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn byte_size(mat_type: MatType, batch: usize, height: usize, width: usize) -> usize {
    let plane = if mat_type.is_yuv420sp() {
        height * width * 3 / 2
    } else {
        mat_type.channels().unwrap_or(1) * height * width
    };
    batch * plane
}

fn image(device: DeviceType, mat_type: MatType, batch: usize, height: usize, width: usize) -> Mat<Vec<u8>> {
    let data = pattern(byte_size(mat_type, batch, height, width));
    Mat::image(device, mat_type, batch, height, width, data).unwrap()
}

fn blank(device: DeviceType, mat_type: MatType, batch: usize, height: usize, width: usize, fill: u8) -> Mat<Vec<u8>> {
    let data = vec![fill; byte_size(mat_type, batch, height, width)];
    Mat::image(device, mat_type, batch, height, width, data).unwrap()
}

#[test]
fn copy_reproduces_every_supported_type() {
    let converters: [(DeviceType, &dyn MatConverterAcc); 2] =
        [(DeviceType::Arm, &ArmMatConverter), (DeviceType::Cpu, &CpuMatConverter)];
    for (device, converter) in converters {
        for mat_type in [MatType::Gray, MatType::Bgr, MatType::Bgra, MatType::Nv12, MatType::Nv21] {
            let src = image(device, mat_type, 2, 4, 6);
            let mut dst = blank(device, mat_type, 2, 4, 6, 0);
            converter.copy(&src.view(), &mut dst.view_mut()).unwrap();
            assert_eq!(dst.data(), src.data(), "{device} {mat_type:?}");
        }

        let floats = Mat::new(device, MatType::NchwFloat, [1, 2, 2, 2], pattern(32)).unwrap();
        let mut dst = Mat::new(device, MatType::NchwFloat, [1, 2, 2, 2], vec![0u8; 32]).unwrap();
        converter.copy(&floats.view(), &mut dst.view_mut()).unwrap();
        assert_eq!(dst.data(), floats.data());
    }
}

#[test]
fn unsupported_copy_leaves_dst_untouched() {
    let src = Mat::new(DeviceType::Arm, MatType::NcInt32, [1, 1, 2, 2], pattern(16)).unwrap();
    let mut dst = Mat::new(DeviceType::Arm, MatType::NcInt32, [1, 1, 2, 2], vec![9u8; 16]).unwrap();
    let err = utils::copy(&src.view(), &mut dst.view_mut()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Param);
    assert!(dst.data().iter().all(|&b| b == 9));

    let cpu_src = Mat::new(DeviceType::Cpu, MatType::NcInt32, [1, 1, 2, 2], pattern(16)).unwrap();
    utils::copy(&cpu_src.view(), &mut dst.view_mut()).unwrap();
    assert_eq!(dst.data(), cpu_src.data());
}

#[test]
fn copy_needs_room_for_the_source() {
    let src = image(DeviceType::Arm, MatType::Bgr, 1, 4, 4);
    let mut dst = blank(DeviceType::Arm, MatType::Bgr, 1, 2, 4, 0);
    let err = utils::copy(&src.view(), &mut dst.view_mut()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Param);
}

#[test]
fn odd_chroma_crops_fail_before_touching_memory() {
    let src = image(DeviceType::Arm, MatType::Nv12, 1, 8, 8);
    let odd = [
        CropParam { top_left_x: 1, top_left_y: 0, width: 4, height: 4 },
        CropParam { top_left_x: 0, top_left_y: 1, width: 4, height: 4 },
        CropParam { top_left_x: 0, top_left_y: 0, width: 3, height: 4 },
        CropParam { top_left_x: 0, top_left_y: 0, width: 4, height: 3 },
    ];
    for param in odd {
        for converter in [&ArmMatConverter as &dyn MatConverterAcc, &CpuMatConverter] {
            let mut dst = blank(DeviceType::Arm, MatType::Nv12, 1, 4, 4, 7);
            let err = converter.crop(&src.view(), &mut dst.view_mut(), &param).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Param, "{param:?}");
            assert!(dst.data().iter().all(|&b| b == 7));
        }
    }
}

#[test]
fn even_chroma_crop_takes_both_planes() {
    let src = image(DeviceType::Arm, MatType::Nv21, 1, 4, 4);
    let mut dst = blank(DeviceType::Arm, MatType::Nv21, 1, 2, 2, 0);
    let param = CropParam { top_left_x: 2, top_left_y: 2, width: 2, height: 2 };
    utils::crop(&src.view(), &mut dst.view_mut(), &param).unwrap();

    let s = src.data();
    let expected = [s[10], s[11], s[14], s[15], s[16 + 4 + 2], s[16 + 4 + 3]];
    assert_eq!(dst.data(), &expected);
}

#[test]
fn packed_crop_copies_the_window() {
    let src = image(DeviceType::Cpu, MatType::Bgr, 1, 3, 3);
    let mut dst = blank(DeviceType::Cpu, MatType::Bgr, 1, 2, 2, 0);
    let param = CropParam { top_left_x: 1, top_left_y: 1, width: 2, height: 2 };
    utils::crop(&src.view(), &mut dst.view_mut(), &param).unwrap();
    let s = src.data();
    let mut expected = Vec::new();
    expected.extend_from_slice(&s[12..18]);
    expected.extend_from_slice(&s[21..27]);
    assert_eq!(dst.data(), expected.as_slice());
}

#[test]
fn crop_window_past_the_source_is_a_param_error() {
    let src = image(DeviceType::Cpu, MatType::Gray, 1, 2, 2);
    let mut dst = blank(DeviceType::Cpu, MatType::Gray, 1, 2, 2, 5);
    for param in [
        CropParam { top_left_x: usize::MAX, top_left_y: 0, width: 2, height: 1 },
        CropParam { top_left_x: 0, top_left_y: usize::MAX, width: 1, height: 2 },
        CropParam { top_left_x: 1, top_left_y: 0, width: 2, height: 1 },
    ] {
        let err = CpuMatConverter.crop(&src.view(), &mut dst.view_mut(), &param).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Param, "{param:?}");
    }
    assert!(dst.data().iter().all(|&b| b == 5));
}

#[test]
fn arm_rejects_operations_it_does_not_implement() {
    let src = image(DeviceType::Arm, MatType::Bgr, 1, 4, 4);
    let mut dst = blank(DeviceType::Arm, MatType::Bgr, 1, 4, 4, 3);

    let err = utils::resize_and_paste(&src.view(), &mut dst.view_mut(), &ResizeParam::default(), &PasteParam::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
    assert!(err.to_string().contains("ResizeAndPaste"));

    let err = utils::concat_mat_with_batch(&[src.view()], &mut dst.view_mut()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
    assert!(err.to_string().contains("ConcatMatWithBatch"));
    assert!(dst.data().iter().all(|&b| b == 3));
}

#[test]
fn zero_sized_destinations_are_invalid_input() {
    let src = image(DeviceType::Arm, MatType::Gray, 1, 4, 4);
    let mut dst = Mat::image(DeviceType::Arm, MatType::Gray, 1, 0, 0, Vec::new()).unwrap();
    let err = utils::resize(&src.view(), &mut dst.view_mut(), &ResizeParam::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let err = utils::warp_affine(&src.view(), &mut dst.view_mut(), &WarpAffineParam::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn arm_warp_is_linear_with_constant_border_only() {
    let src = image(DeviceType::Arm, MatType::Gray, 1, 4, 4);
    let mut dst = blank(DeviceType::Arm, MatType::Gray, 1, 4, 4, 5);

    let nearest = WarpAffineParam { interp: Interpolation::Nearest, ..WarpAffineParam::default() };
    let err = utils::warp_affine(&src.view(), &mut dst.view_mut(), &nearest).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Param);
    let edge = WarpAffineParam { border: BorderType::Edge, ..WarpAffineParam::default() };
    assert!(utils::warp_affine(&src.view(), &mut dst.view_mut(), &edge).is_err());
    assert!(dst.data().iter().all(|&b| b == 5));

    utils::warp_affine(&src.view(), &mut dst.view_mut(), &WarpAffineParam::default()).unwrap();
    assert_eq!(dst.data(), src.data());
}

#[test]
fn translation_warp_fills_the_uncovered_border() {
    let src = image(DeviceType::Cpu, MatType::Gray, 1, 2, 2);
    let mut dst = blank(DeviceType::Cpu, MatType::Gray, 1, 2, 2, 0);
    let param = WarpAffineParam {
        transform: [[1.0, 0.0, 1.0], [0.0, 1.0, 0.0]],
        interp: Interpolation::Nearest,
        border: BorderType::Constant,
        border_val: 200.0,
    };
    utils::warp_affine(&src.view(), &mut dst.view_mut(), &param).unwrap();
    let s = src.data();
    assert_eq!(dst.data(), &[200, s[0], 200, s[2]]);
}

#[test]
fn nearest_resize_of_yuv_scales_both_planes() {
    let src = image(DeviceType::Arm, MatType::Nv12, 1, 2, 2);
    let mut dst = blank(DeviceType::Arm, MatType::Nv12, 1, 4, 4, 0);
    let param = ResizeParam { interp: Interpolation::Nearest, ..ResizeParam::default() };
    utils::resize(&src.view(), &mut dst.view_mut(), &param).unwrap();
    let (s, d) = (src.data(), dst.data());
    assert_eq!(&d[..4], &[s[0], s[0], s[1], s[1]]);
    assert_eq!(&d[16..20], &[s[4], s[5], s[4], s[5]]);
}

#[test]
fn nv21_with_neutral_chroma_converts_to_gray_bgr() {
    let mut data = vec![60u8; 4];
    data.extend_from_slice(&[128, 128]);
    let src = Mat::image(DeviceType::Arm, MatType::Nv21, 1, 2, 2, data).unwrap();
    let mut dst = blank(DeviceType::Arm, MatType::Bgr, 1, 2, 2, 0);
    utils::cvt_color(&src.view(), &mut dst.view_mut(), ColorConversion::Nv21ToBgr).unwrap();
    assert_eq!(dst.data(), &[60u8; 12]);

    let mut wrong = blank(DeviceType::Arm, MatType::Bgra, 1, 2, 2, 0);
    let err = utils::cvt_color(&src.view(), &mut wrong.view_mut(), ColorConversion::Nv21ToBgr).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Param);
}

#[test]
fn cpu_pastes_the_resized_image_centered() {
    let src = Mat::image(DeviceType::Cpu, MatType::Gray, 1, 2, 2, vec![10u8, 20, 30, 40]).unwrap();
    let mut dst = blank(DeviceType::Cpu, MatType::Gray, 1, 4, 4, 0);
    let param = ResizeParam { scale_w: 1.0, scale_h: 1.0, interp: Interpolation::Nearest };
    let paste = PasteParam { paste_type: PasteType::Center, pad_value: 255 };
    utils::resize_and_paste(&src.view(), &mut dst.view_mut(), &param, &paste).unwrap();
    #[rustfmt::skip]
    let expected = [
        255, 255, 255, 255,
        255, 10, 20, 255,
        255, 30, 40, 255,
        255, 255, 255, 255,
    ];
    assert_eq!(dst.data(), &expected);
}

#[test]
fn cpu_concatenates_along_the_batch() {
    let a = image(DeviceType::Cpu, MatType::Bgra, 1, 2, 2);
    let b = image(DeviceType::Cpu, MatType::Bgra, 2, 2, 2);
    let mut dst = blank(DeviceType::Cpu, MatType::Bgra, 3, 2, 2, 0);
    utils::concat_mat_with_batch(&[a.view(), b.view()], &mut dst.view_mut()).unwrap();
    assert_eq!(&dst.data()[..16], a.data());
    assert_eq!(&dst.data()[16..], b.data());

    let mut short = blank(DeviceType::Cpu, MatType::Bgra, 2, 2, 2, 0);
    assert!(utils::concat_mat_with_batch(&[a.view(), b.view()], &mut short.view_mut()).is_err());
}

#[test]
fn mats_on_different_devices_are_rejected() {
    let src = image(DeviceType::Arm, MatType::Gray, 1, 2, 2);
    let mut dst = blank(DeviceType::Cpu, MatType::Gray, 1, 2, 2, 0);
    let err = utils::resize(&src.view(), &mut dst.view_mut(), &ResizeParam::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Param);
}

#[test]
fn devices_without_a_converter_are_not_supported() {
    let err = MatConverterRegistry::global().get(DeviceType::Npu).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::DeviceNotSupported);
}
