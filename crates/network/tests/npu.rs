use compute::{CommandQueue, ComputeError, DeviceType, ErrorKind, HostBuffer};
use network::npu::{Faults, ModelManifest, NpuDriver, SimulatedNpu};
use network::{
    InputShapesMap, ModelConfig, ModelType, NetworkBackend, NetworkConfig, NetworkFactory, NetworkState, NpuNetwork,
    NpuRuntime,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const DYNAMIC: &str = r#"{
    "mem_size": 2048,
    "weight_size": 512,
    "inputs": [
        {"name": "data", "dims": [-1, 3, 224, 224], "data_type": "float"},
        {"name": "ascend_mbatch_shape_data", "dims": [1], "data_type": "int64", "format": "nd"}
    ],
    "outputs": [{"name": "prob", "dims": [-1, 1000], "data_type": "float", "format": "nd"}],
    "dynamic_batch": [1, 2, 4]
}"#;

const TWO_INPUTS: &str = r#"{
    "inputs": [
        {"name": "image", "dims": [-1, 4], "data_type": "float", "format": "nd"},
        {"name": "mask", "dims": [-1, 4], "data_type": "float", "format": "nd"},
        {"name": "meta", "dims": [1, 2], "data_type": "float", "format": "nd"},
        {"name": "ascend_mbatch_shape_data", "dims": [1], "data_type": "int64", "format": "nd"}
    ],
    "outputs": [{"name": "score", "dims": [-1, 2], "data_type": "float", "format": "nd"}],
    "dynamic_batch": [1, 2, 4]
}"#;

const UNBOUND: &str = r#"{
    "inputs": [
        {"name": "x", "dims": [-1, 10], "data_type": "float", "format": "nd", "size": 480},
        {"name": "ascend_dynamic_aipp_data", "dims": [64], "data_type": "uint8", "format": "nd"}
    ],
    "outputs": [{"name": "y", "dims": [-1, 10], "data_type": "float", "format": "nd", "size": 480}]
}"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn classifier_path() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/classifier.json").to_string()
}

/// Simulated device with the classifier fixture plus `extra` registered.
fn npu(extra: &[(&str, &str)]) -> (Arc<SimulatedNpu>, Arc<NpuRuntime>) {
    init_tracing();
    let driver = Arc::new(SimulatedNpu::new());
    for (path, json) in extra {
        driver.register_model(*path, ModelManifest::from_json(json).unwrap());
    }
    let runtime = NpuRuntime::new(driver.clone());
    (driver, runtime)
}

fn config() -> NetworkConfig {
    NetworkConfig::new(DeviceType::Npu)
}

fn model(path: &str) -> ModelConfig {
    ModelConfig::new(ModelType::Npu, path)
}

fn shapes(name: &str, dims: &[usize]) -> InputShapesMap {
    InputShapesMap::from([(name.to_string(), dims.to_vec())])
}

fn assert_nothing_alive(driver: &SimulatedNpu, runtime: &NpuRuntime) {
    assert_eq!(driver.live_allocations(), 0, "device buffers leaked");
    assert_eq!(driver.live_contexts(), 0, "contexts leaked");
    assert_eq!(driver.live_streams(), 0, "streams leaked");
    assert_eq!(driver.loaded_models(), 0, "models still loaded");
    assert_eq!(runtime.holders(), 0);
    assert!(!driver.is_initialized());
}

#[test]
fn classifier_runs_end_to_end() {
    let (driver, runtime) = npu(&[]);
    let mut network = NetworkFactory::new().with_npu_runtime(runtime.clone()).create(&config()).unwrap();
    network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();
    assert_eq!(network.state(), NetworkState::Initialized);

    let inputs = network.input_blobs();
    assert_eq!(inputs.keys().collect::<Vec<_>>(), vec!["data"]);
    let data = &inputs["data"];
    assert_eq!(data.desc().dims, vec![1, 3, 224, 224]);
    assert_eq!(data.desc().device_type, DeviceType::Npu);
    data.write_f32(&vec![0.5; 3 * 224 * 224]).unwrap();

    network.forward().unwrap();
    let prob = &network.output_blobs()["prob"];
    assert_eq!(prob.desc().dims, vec![1, 1000, 1, 1]);
    let values = prob.read_f32().unwrap();
    assert_eq!(values.len(), 1000);
    assert!(values.iter().all(|v| v.is_finite() && *v == 0.5));
    assert_eq!(driver.executions(), 1);
    assert_eq!(network.forward_memory_size().unwrap(), 4096);

    network.deinit().unwrap();
    assert_eq!(network.state(), NetworkState::Deinitialized);
    assert!(network.input_blobs().is_empty() && network.output_blobs().is_empty());
    assert_nothing_alive(&driver, &runtime);
    assert_eq!((driver.init_calls(), driver.finalize_calls()), (1, 1));
}

#[test]
fn dynamic_batch_follows_the_input_shape() {
    let (driver, runtime) = npu(&[("dynamic", DYNAMIC)]);
    let mut network = NpuNetwork::new(runtime.clone());
    network.init(&config(), &model("dynamic"), &InputShapesMap::new()).unwrap();

    // The batch control input is not a blob; the data batch starts at the largest one.
    assert_eq!(network.input_blobs().keys().collect::<Vec<_>>(), vec!["data"]);
    assert_eq!(network.input_blobs()["data"].desc().dims, vec![4, 3, 224, 224]);

    network.reshape(&shapes("data", &[2, 3, 224, 224])).unwrap();
    assert_eq!(network.state(), NetworkState::Reshaped);
    assert_eq!(network.output_blobs()["prob"].desc().dims, vec![2, 1000, 1, 1]);

    let per_batch = 3 * 224 * 224;
    let mut values = vec![1.0; per_batch];
    values.extend(std::iter::repeat(3.0).take(per_batch));
    network.input_blobs()["data"].write_f32(&values).unwrap();
    network.forward().unwrap();
    let prob = network.output_blobs()["prob"].read_f32().unwrap();
    assert_eq!(prob.len(), 2000);
    assert!(prob[..1000].iter().all(|&v| v == 1.0));
    assert!(prob[1000..].iter().all(|&v| v == 3.0));

    network.reshape(&shapes("data", &[4, 3, 224, 224])).unwrap();
    assert_eq!(network.output_blobs()["prob"].desc().dims, vec![4, 1000, 1, 1]);

    let err = network.reshape(&shapes("data", &[3, 3, 224, 224])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    // A rejected batch leaves the blobs as they were.
    assert_eq!(network.input_blobs()["data"].desc().dims, vec![4, 3, 224, 224]);
    assert_eq!(network.output_blobs()["prob"].desc().dims, vec![4, 1000, 1, 1]);

    network.deinit().unwrap();
    assert_nothing_alive(&driver, &runtime);
}

#[test]
fn only_batch_bound_inputs_drive_the_dynamic_batch() {
    let (driver, runtime) = npu(&[("two_inputs", TWO_INPUTS)]);
    let mut network = NpuNetwork::new(runtime.clone());
    network.init(&config(), &model("two_inputs"), &InputShapesMap::new()).unwrap();

    let mut input_shapes = shapes("image", &[2, 4]);
    input_shapes.insert("mask".into(), vec![2, 4]);
    input_shapes.insert("meta".into(), vec![1, 2, 1, 1]);
    network.reshape(&input_shapes).unwrap();
    assert_eq!(network.output_blobs()["score"].desc().dims, vec![2, 2, 1, 1]);
    assert_eq!(network.input_blobs()["meta"].desc().dims, vec![1, 2, 1, 1]);

    input_shapes.insert("mask".into(), vec![1, 4]);
    let err = network.reshape(&input_shapes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Param);
    assert_eq!(network.input_blobs()["mask"].desc().dims, vec![2, 4]);

    let both = |batch: usize| {
        let mut map = shapes("image", &[batch, 4]);
        map.insert("mask".into(), vec![batch, 4]);
        map
    };
    let err = network.reshape(&both(3)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert_eq!(network.input_blobs()["image"].desc().dims, vec![2, 4]);
    assert_eq!(network.output_blobs()["score"].desc().dims, vec![2, 2, 1, 1]);

    network.reshape(&both(4)).unwrap();
    assert_eq!(network.output_blobs()["score"].desc().dims, vec![4, 2, 1, 1]);

    network.deinit().unwrap();
    assert_nothing_alive(&driver, &runtime);
}

#[test]
fn init_with_shapes_reshapes_right_away() {
    let (_driver, runtime) = npu(&[("dynamic", DYNAMIC)]);
    let mut network = NpuNetwork::new(runtime);
    network.init(&config(), &model("dynamic"), &shapes("data", &[1, 3, 224, 224])).unwrap();
    assert_eq!(network.state(), NetworkState::Reshaped);
    assert_eq!(network.output_blobs()["prob"].desc().dims, vec![1, 1000, 1, 1]);
}

#[test]
fn unbound_batch_comes_from_the_buffer_size() {
    let (driver, runtime) = npu(&[("unbound", UNBOUND)]);
    let mut network = NpuNetwork::new(runtime);
    network.init(&config(), &model("unbound"), &InputShapesMap::new()).unwrap();

    assert_eq!(network.input_blobs()["x"].desc().dims, vec![12, 10, 1, 1]);
    assert_eq!(network.output_blobs()["y"].desc().dims, vec![12, 10, 1, 1]);
    // Preprocessing inputs get device memory but no blob.
    assert!(!network.input_blobs().contains_key("ascend_dynamic_aipp_data"));
    assert_eq!(driver.live_allocations(), 2 + 3);
}

#[test]
fn blob_memory_identifies_the_model() {
    let (_driver, runtime) = npu(&[]);
    let mut network = NpuNetwork::new(runtime.clone());
    network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();

    let info = runtime.model_info(&network.input_blobs()["data"]).unwrap();
    assert_eq!(Some(info.model_id), network.model_id());
    assert_eq!(info.desc.inputs[0].name, "data");
    assert_eq!(info.input_buffers.len(), 1);
    assert!(runtime.model_info(&network.output_blobs()["prob"]).is_none());

    network.deinit().unwrap();
    assert_eq!(runtime.model_info_count(), 0);
}

#[test]
fn runtime_lives_until_the_last_network_is_gone() {
    let (driver, runtime) = npu(&[]);
    let mut networks: Vec<NpuNetwork> = (0..3).map(|_| NpuNetwork::new(runtime.clone())).collect();
    for network in &mut networks {
        network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();
    }
    assert_eq!(driver.init_calls(), 1);
    assert_eq!(runtime.holders(), 3);

    for network in &mut networks[..2] {
        network.deinit().unwrap();
    }
    assert_eq!(driver.finalize_calls(), 0);
    assert!(driver.is_initialized());

    networks[2].deinit().unwrap();
    assert_eq!(driver.finalize_calls(), 1);
    assert_nothing_alive(&driver, &runtime);
}

#[test]
fn concurrent_networks_share_one_runtime() {
    const THREADS: usize = 6;
    let (driver, runtime) = npu(&[]);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let runtime = runtime.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut network = NpuNetwork::new(runtime);
                network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();
                barrier.wait();
                network.deinit().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(driver.init_calls(), 1);
    assert_eq!(driver.finalize_calls(), 1);
    assert_nothing_alive(&driver, &runtime);
}

#[test]
fn failed_init_releases_everything_it_acquired() {
    // Allocations: model memory, model weight, input buffer, output buffer.
    for fail_alloc_at in 1..=4 {
        let (driver, runtime) = npu(&[]);
        driver.set_faults(Faults { fail_alloc_at: Some(fail_alloc_at), ..Faults::default() });
        let mut network = NpuNetwork::new(runtime.clone());
        let err = network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime, "allocation {fail_alloc_at}");
        assert_eq!(network.state(), NetworkState::Uninitialized);
        assert_nothing_alive(&driver, &runtime);
    }

    for faults in [
        Faults { create_context: true, ..Faults::default() },
        Faults { create_stream: true, ..Faults::default() },
        Faults { load_model: true, ..Faults::default() },
    ] {
        let (driver, runtime) = npu(&[]);
        driver.set_faults(faults.clone());
        let mut network = NpuNetwork::new(runtime.clone());
        let err = network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime, "{faults:?}");
        assert_nothing_alive(&driver, &runtime);
    }
}

#[test]
fn missing_model_file_is_a_runtime_error() {
    let (driver, runtime) = npu(&[]);
    let mut network = NpuNetwork::new(runtime.clone());
    let err = network.init(&config(), &model("/nonexistent/model.om"), &InputShapesMap::new()).unwrap_err();
    assert!(matches!(err, ComputeError::Runtime { code: Some(100_002), .. }), "{err}");
    assert_nothing_alive(&driver, &runtime);
}

#[test]
fn init_checks_device_and_model_type() {
    let (driver, runtime) = npu(&[]);
    let mut network = NpuNetwork::new(runtime);

    let err = network
        .init(&NetworkConfig::new(DeviceType::Cpu), &model(&classifier_path()), &InputShapesMap::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceNotSupported);

    let graph = ModelConfig::new(ModelType::LayerGraph, classifier_path());
    assert_eq!(network.init(&config(), &graph, &InputShapesMap::new()).unwrap_err().kind(), ErrorKind::Param);
    assert_eq!(driver.init_calls(), 0);

    network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();
    let again = network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap_err();
    assert_eq!(again.kind(), ErrorKind::Param);
}

#[test]
fn forward_needs_an_initialized_network() {
    let (_driver, runtime) = npu(&[]);
    let mut network = NpuNetwork::new(runtime);
    assert_eq!(network.forward().unwrap_err().kind(), ErrorKind::Param);
    assert_eq!(network.reshape(&InputShapesMap::new()).unwrap_err().kind(), ErrorKind::Param);
    assert!(network.deinit().is_ok());
    assert_eq!(network.state(), NetworkState::Uninitialized);
}

#[test]
fn failed_execution_names_the_model() {
    let (driver, runtime) = npu(&[]);
    let mut network = NpuNetwork::new(runtime);
    network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();
    driver.set_faults(Faults { execute: true, ..Faults::default() });

    let err = network.forward().unwrap_err();
    let ComputeError::Runtime { message, code } = &err else { panic!("unexpected error {err}") };
    assert_eq!(message, &format!("execute model failed, modelId is {}", network.model_id().unwrap()));
    assert_eq!(*code, Some(500_000));
    assert_eq!(network.state(), NetworkState::Initialized);

    driver.set_faults(Faults::default());
    network.forward().unwrap();
}

#[test]
fn lost_context_fails_reshape_and_forward() {
    let (driver, runtime) = npu(&[]);
    let mut network = NpuNetwork::new(runtime);
    network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();
    driver.set_faults(Faults { set_current_context: true, ..Faults::default() });

    assert_eq!(network.reshape(&shapes("data", &[1, 3, 224, 224])).unwrap_err().kind(), ErrorKind::Runtime);
    assert_eq!(network.forward().unwrap_err().kind(), ErrorKind::Runtime);
    assert_eq!(driver.executions(), 0);
}

#[test]
fn deinit_keeps_going_after_a_failed_step() {
    let (driver, runtime) = npu(&[]);
    let mut network = NpuNetwork::new(runtime.clone());
    network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();
    driver.set_faults(Faults { destroy_stream: true, ..Faults::default() });

    let err = network.deinit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert_eq!(network.state(), NetworkState::Deinitialized);
    assert_nothing_alive(&driver, &runtime);
    assert_eq!(driver.finalize_calls(), 1);
}

#[test]
fn dropping_a_network_releases_it() {
    let (driver, runtime) = npu(&[]);
    {
        let mut network = NpuNetwork::new(runtime.clone());
        network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();
        assert_eq!(driver.live_allocations(), 4);
    }
    assert_nothing_alive(&driver, &runtime);
}

#[test]
fn forward_memory_cannot_be_set() {
    let (_driver, runtime) = npu(&[]);
    let mut network = NpuNetwork::new(runtime);
    network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();
    let memory: HostBuffer = compute::host_buffer(4096);
    assert_eq!(network.set_forward_memory(memory).unwrap_err().kind(), ErrorKind::NotSupported);
}

#[test]
fn forward_async_reports_through_the_callback() {
    let (_driver, runtime) = npu(&[]);
    let mut network = NpuNetwork::new(runtime);
    network.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();

    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    network
        .forward_async(Box::new(move |result: &compute::Result<()>| {
            assert!(result.is_ok());
            flag.store(true, Ordering::SeqCst);
        }))
        .unwrap();
    assert!(called.load(Ordering::SeqCst));
}

#[test]
fn networks_can_share_a_stream() {
    let (driver, runtime) = npu(&[]);
    let mut first = NpuNetwork::new(runtime.clone());
    let mut second = NpuNetwork::new(runtime.clone());
    first.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();
    second.init(&config(), &model(&classifier_path()), &InputShapesMap::new()).unwrap();
    assert_eq!(driver.live_streams(), 2);

    second.share_command_queue(&first).unwrap();
    assert_eq!(driver.live_streams(), 1);
    let (CommandQueue::Npu { stream: shared, .. }, CommandQueue::Npu { stream: own, .. }) =
        (second.command_queue().unwrap(), first.command_queue().unwrap())
    else {
        panic!("npu networks run on npu queues");
    };
    assert_eq!(shared, own);

    let err = second.set_command_queue(CommandQueue::Host).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Param);

    second.deinit().unwrap();
    first.forward().unwrap();
    first.deinit().unwrap();
    assert_nothing_alive(&driver, &runtime);
}

#[test]
fn manifests_describe_the_loaded_model() {
    let (driver, _runtime) = npu(&[("dynamic", DYNAMIC)]);
    let mem = driver.malloc(2048).unwrap();
    let weight = driver.malloc(512).unwrap();
    let id = driver.load_model(std::path::Path::new("dynamic"), &mem, &weight).unwrap();
    let desc = driver.model_desc(id).unwrap();
    assert!(desc.is_dynamic_batch());
    assert!(desc.is_dynamic_batch_input("data"));
    assert!(!desc.is_dynamic_batch_input("ascend_mbatch_shape_data"));
    assert_eq!(desc.input_index_by_name("ascend_mbatch_shape_data").unwrap(), 1);
    assert_eq!(desc.inputs[0].size, 4 * 3 * 224 * 224 * 4);
}
