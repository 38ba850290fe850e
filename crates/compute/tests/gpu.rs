// Golden-master tests: the wgpu shader queue must reproduce the CPU reference
// queue bit for bit on every binary kernel.

#[cfg(feature = "gpu")]
mod wgpu_tests {
    use compute::kernels::BinaryConfig;
    use compute::{BufferView, ComputeBackend, CpuBackend, Kernel, WgpuBackend};
    use std::sync::Arc;

    fn f32_view(values: &[f32], shape: Vec<usize>) -> BufferView {
        let bytes: Arc<[u8]> = bytemuck::cast_slice::<f32, u8>(values).to_vec().into();
        BufferView::new(bytes, shape, std::mem::size_of::<f32>())
    }

    fn run_kernel_test(kernel: Kernel, a: (&[f32], Vec<usize>), b: (&[f32], Vec<usize>), out: Vec<usize>) {
        let Ok(wgpu_backend) = WgpuBackend::new() else {
            eprintln!("no wgpu adapter, skipping {kernel:?}");
            return;
        };
        let cpu_backend = CpuBackend::new();

        let cfg = BinaryConfig::for_shapes(&out, &a.1, &b.1, false).unwrap();
        let len: usize = out.iter().product();
        let binds = vec![
            f32_view(a.0, a.1),
            f32_view(b.0, b.1),
            f32_view(&vec![0.0; len], out),
            BufferView::new(bytemuck::bytes_of(&cfg).to_vec().into(), vec![8], 4),
        ];
        let workgroups = [cfg.len.div_ceil(64), 1, 1];

        let expected = cpu_backend.dispatch(&kernel, &binds, workgroups).unwrap();
        let actual = wgpu_backend.dispatch(&kernel, &binds, workgroups).unwrap();

        assert_eq!(expected.len(), actual.len(), "Mismatched number of output buffers");
        for (i, (e, a)) in expected.iter().zip(&actual).enumerate() {
            assert_eq!(e, a, "Mismatch in buffer at index {i} for {kernel:?}");
        }
    }

    #[test]
    fn elementwise_kernels_match_the_reference_queue() {
        let a = [1.0f32, -2.0, 3.5, 4.0, 0.25, -6.0];
        let b = [5.0f32, 6.0, -7.0, 8.0, 2.0, 3.0];
        // Division is left to the power-of-two case below; WGSL allows it to round differently.
        for kernel in [Kernel::Add, Kernel::Sub, Kernel::Mul, Kernel::Max, Kernel::Min] {
            run_kernel_test(kernel, (&a, vec![2, 3]), (&b, vec![2, 3]), vec![2, 3]);
        }
    }

    #[test]
    fn channel_broadcast_matches_the_reference_queue() {
        let a: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let b = [1.0f32, 2.0, 4.0];
        for kernel in [Kernel::Sub, Kernel::Div] {
            run_kernel_test(kernel, (&a, vec![1, 3, 2, 2]), (&b, vec![1, 3, 1, 1]), vec![1, 3, 2, 2]);
        }
    }

    #[test]
    fn scalar_operand_spans_every_workgroup() {
        let a: Vec<f32> = (0..130).map(|v| v as f32 * 0.5).collect();
        run_kernel_test(Kernel::Max, (&a, vec![130]), (&[20.0], vec![1]), vec![130]);
    }

    mod context {
        use compute::device::gpu::GpuContext;
        use compute::{CommandQueue, DeviceContext, ErrorKind};
        use std::sync::Arc;

        #[test]
        fn context_without_a_device_has_no_workspace() {
            let mut ctx = GpuContext::new();
            assert!(!ctx.owns_queue());
            assert_eq!(ctx.workspace(16).unwrap_err().kind(), ErrorKind::NullParam);
            assert_eq!(ctx.set_command_queue(CommandQueue::Host).unwrap_err().kind(), ErrorKind::Param);
        }

        #[test]
        fn workspace_grows_and_a_shared_queue_starts_without_one() {
            let mut ctx = GpuContext::new();
            if ctx.setup(0).is_err() {
                eprintln!("no wgpu adapter, skipping workspace test");
                return;
            }
            assert!(ctx.owns_queue());

            let small = ctx.workspace(16).unwrap();
            assert!(Arc::ptr_eq(&small, &ctx.workspace(8).unwrap()));
            let large = ctx.workspace(64).unwrap();
            assert!(!Arc::ptr_eq(&small, &large));
            assert!(ctx.workspace_size() >= 64);

            let mut shared = GpuContext::new();
            shared.share_command_queue(&ctx).unwrap();
            assert!(!shared.owns_queue());
            assert_eq!(shared.workspace_size(), 0);
            ctx.synchronize().unwrap();
        }
    }
}
