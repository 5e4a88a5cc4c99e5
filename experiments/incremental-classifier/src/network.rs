use anyhow::{anyhow, bail, Result};
use burn::{
    module::{Module, Param},
    nn::Linear,
    tensor::{activation::relu, backend::Backend, Tensor, TensorData},
};
use rand::{rngs::StdRng, Rng};

/// MLP backbone with a linear head that grows by one block of classes per task.
#[derive(Module, Debug)]
pub struct IncrementalNet<B: Backend> {
    backbone: Linear<B>,
    head: Option<Linear<B>>,
}

impl<B: Backend> IncrementalNet<B> {
    pub fn init(device: &B::Device, rng: &mut StdRng, input_dim: usize, hidden_dim: usize) -> Self {
        Self {
            backbone: linear_from_rng::<B>(rng, device, input_dim, hidden_dim),
            head: None,
        }
    }

    pub fn feature_dim(&self) -> usize {
        self.backbone.weight.val().dims()[1]
    }

    pub fn num_classes(&self) -> usize {
        self.head
            .as_ref()
            .map_or(0, |head| head.weight.val().dims()[1])
    }

    pub fn head_params(&self) -> usize {
        self.head.as_ref().map_or(0, |head| head.num_params())
    }

    pub fn features(&self, inputs: Tensor<B, 2>) -> Tensor<B, 2> {
        relu(self.backbone.forward(inputs))
    }

    pub fn classify(&self, features: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        match &self.head {
            Some(head) => Ok(head.forward(features)),
            None => bail!("classifier head has no classes yet"),
        }
    }

    pub fn forward(&self, inputs: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        self.classify(self.features(inputs))
    }

    /// Widen the head to `total_classes` outputs. Existing class columns keep
    /// their weights; the new ones are drawn like a fresh layer.
    pub fn expand_head(
        mut self,
        rng: &mut StdRng,
        device: &B::Device,
        total_classes: usize,
    ) -> Result<Self> {
        let feature_dim = self.feature_dim();
        let old_classes = self.num_classes();
        if total_classes < old_classes {
            bail!(
                "cannot shrink the head from {} to {} classes",
                old_classes,
                total_classes
            );
        }

        let (old_weight, mut bias) = match &self.head {
            Some(head) => {
                let weight = tensor_values(head.weight.val())?;
                let bias = match &head.bias {
                    Some(bias) => tensor_values(bias.val())?,
                    None => vec![0.0; old_classes],
                };
                (weight, bias)
            }
            None => (Vec::new(), Vec::new()),
        };

        let limit = (1.0f32 / feature_dim as f32).sqrt();
        let added = total_classes - old_classes;
        let mut weight = Vec::with_capacity(feature_dim * total_classes);
        for row in 0..feature_dim {
            weight.extend_from_slice(&old_weight[row * old_classes..(row + 1) * old_classes]);
            weight.extend((0..added).map(|_| uniform(rng, limit)));
        }
        bias.extend((0..added).map(|_| uniform(rng, limit)));

        let weight = Tensor::<B, 2>::from_floats(
            TensorData::new(weight, [feature_dim, total_classes]),
            device,
        );
        let bias = Tensor::<B, 1>::from_floats(TensorData::new(bias, [total_classes]), device);
        self.head = Some(Linear {
            weight: Param::from_tensor(weight),
            bias: Some(Param::from_tensor(bias)),
        });

        Ok(self)
    }
}

pub fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| anyhow!("failed to read tensor data: {err:?}"))
}

fn uniform(rng: &mut StdRng, limit: f32) -> f32 {
    rng.gen::<f32>() * 2.0 * limit - limit
}

fn linear_from_rng<B: Backend>(
    rng: &mut StdRng,
    device: &B::Device,
    fan_in: usize,
    fan_out: usize,
) -> Linear<B> {
    let limit = (1.0f32 / fan_in as f32).sqrt();
    let weight = random_tensor::<B, 2>(rng, [fan_in, fan_out], limit, device);
    let bias = random_tensor::<B, 1>(rng, [fan_out], limit, device);

    Linear {
        weight: Param::from_tensor(weight),
        bias: Some(Param::from_tensor(bias)),
    }
}

fn random_tensor<B: Backend, const D: usize>(
    rng: &mut StdRng,
    shape: [usize; D],
    limit: f32,
    device: &B::Device,
) -> Tensor<B, D> {
    let total: usize = shape.iter().product();
    let values: Vec<f32> = (0..total).map(|_| uniform(rng, limit)).collect();

    Tensor::<B, D>::from_floats(TensorData::new(values, shape), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_candle::{Candle, CandleDevice};
    use cilrun_core::seeded_rng;

    type TestBackend = Candle<f32, i64>;

    fn net(rng: &mut StdRng) -> IncrementalNet<TestBackend> {
        IncrementalNet::init(&CandleDevice::Cpu, rng, 4, 8)
    }

    #[test]
    fn head_starts_empty() {
        let mut rng = seeded_rng(1);
        let net = net(&mut rng);
        assert_eq!(net.num_classes(), 0);
        assert_eq!(net.head_params(), 0);
        assert_eq!(net.num_params(), 4 * 8 + 8);
        let inputs = Tensor::<TestBackend, 2>::zeros([2, 4], &CandleDevice::Cpu);
        assert!(net.forward(inputs).is_err());
    }

    #[test]
    fn expansion_keeps_old_class_weights() {
        let device = CandleDevice::Cpu;
        let mut rng = seeded_rng(2);
        let net = net(&mut rng).expand_head(&mut rng, &device, 2).unwrap();
        let before = tensor_values(net.head.as_ref().unwrap().weight.val()).unwrap();

        let net = net.expand_head(&mut rng, &device, 5).unwrap();
        assert_eq!(net.num_classes(), 5);
        assert_eq!(net.head_params(), 8 * 5 + 5);
        assert_eq!(net.num_params(), 4 * 8 + 8 + 8 * 5 + 5);

        let after = tensor_values(net.head.as_ref().unwrap().weight.val()).unwrap();
        for row in 0..8 {
            assert_eq!(&after[row * 5..row * 5 + 2], &before[row * 2..row * 2 + 2]);
        }

        let inputs = Tensor::<TestBackend, 2>::ones([3, 4], &device);
        assert_eq!(net.forward(inputs).unwrap().dims(), [3, 5]);
    }

    #[test]
    fn head_cannot_shrink() {
        let device = CandleDevice::Cpu;
        let mut rng = seeded_rng(3);
        let net = net(&mut rng).expand_head(&mut rng, &device, 4).unwrap();
        assert!(net.expand_head(&mut rng, &device, 2).is_err());
    }

    #[test]
    fn same_seed_same_weights() {
        let a = net(&mut seeded_rng(9));
        let b = net(&mut seeded_rng(9));
        assert_eq!(
            tensor_values(a.backbone.weight.val()).unwrap(),
            tensor_values(b.backbone.weight.val()).unwrap()
        );
    }
}
