//! Stacked LSTM network with a two-layer dense head.
//!
//! Layout: `LSTM(h1) -> Dropout -> ... -> LSTM(hk) -> Dropout -> Dense(d, ReLU)
//! -> Dense(1)`. Every LSTM layer except the last feeds its full hidden-state
//! sequence to the next; the last one only emits its final state.
//!
//! Gate order inside the fused weight matrices is input, forget, cell, output.
//! Training uses backpropagation through time over the whole window.

use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Axis, Zip};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Rows per forward pass when predicting large batches
const PREDICT_CHUNK: usize = 256;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn glorot_uniform(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
}

/// Inverted dropout mask: kept units are scaled by `1 / (1 - rate)`
fn dropout_mask(shape: (usize, usize), rate: f64, rng: &mut StdRng) -> Array2<f64> {
    let keep = 1.0 - rate;
    Array2::from_shape_fn(shape, |_| if rng.gen_bool(keep) { 1.0 / keep } else { 0.0 })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmLayer {
    hidden: usize,
    /// Input kernel `(input, 4 * hidden)`
    w: Array2<f64>,
    /// Recurrent kernel `(hidden, 4 * hidden)`
    u: Array2<f64>,
    /// Bias `(1, 4 * hidden)`
    b: Array2<f64>,
}

/// Activations of one timestep, kept for the backward pass
struct StepCache {
    x: Array2<f64>,
    h_prev: Array2<f64>,
    c_prev: Array2<f64>,
    i: Array2<f64>,
    f: Array2<f64>,
    g: Array2<f64>,
    o: Array2<f64>,
    tanh_c: Array2<f64>,
    h: Array2<f64>,
    c: Array2<f64>,
}

impl LstmLayer {
    fn new(input: usize, hidden: usize, rng: &mut StdRng) -> Self {
        let mut b = Array2::zeros((1, 4 * hidden));
        // unit forget bias
        b.slice_mut(s![.., hidden..2 * hidden]).fill(1.0);

        Self {
            hidden,
            w: glorot_uniform(input, 4 * hidden, rng),
            u: glorot_uniform(hidden, 4 * hidden, rng),
            b,
        }
    }

    fn step(&self, x: ArrayView2<f64>, h_prev: &Array2<f64>, c_prev: &Array2<f64>) -> StepCache {
        let hd = self.hidden;
        let z = x.dot(&self.w) + h_prev.dot(&self.u) + &self.b;

        let i = z.slice(s![.., 0..hd]).mapv(sigmoid);
        let f = z.slice(s![.., hd..2 * hd]).mapv(sigmoid);
        let g = z.slice(s![.., 2 * hd..3 * hd]).mapv(f64::tanh);
        let o = z.slice(s![.., 3 * hd..]).mapv(sigmoid);

        let c = &f * c_prev + &i * &g;
        let tanh_c = c.mapv(f64::tanh);
        let h = &o * &tanh_c;

        StepCache {
            x: x.to_owned(),
            h_prev: h_prev.clone(),
            c_prev: c_prev.clone(),
            i,
            f,
            g,
            o,
            tanh_c,
            h,
            c,
        }
    }

    fn forward(&self, inputs: &[Array2<f64>]) -> Vec<StepCache> {
        let batch = inputs.first().map_or(0, |x| x.nrows());
        let mut h = Array2::zeros((batch, self.hidden));
        let mut c = Array2::zeros((batch, self.hidden));
        let mut steps = Vec::with_capacity(inputs.len());

        for x in inputs {
            let step = self.step(x.view(), &h, &c);
            h = step.h.clone();
            c = step.c.clone();
            steps.push(step);
        }
        steps
    }

    /// Forward pass without caches; returns the hidden state of every step
    fn run(&self, inputs: &[Array2<f64>]) -> Vec<Array2<f64>> {
        let batch = inputs.first().map_or(0, |x| x.nrows());
        let mut h = Array2::zeros((batch, self.hidden));
        let mut c = Array2::zeros((batch, self.hidden));
        let mut outputs = Vec::with_capacity(inputs.len());

        for x in inputs {
            let step = self.step(x.view(), &h, &c);
            h = step.h;
            c = step.c;
            outputs.push(h.clone());
        }
        outputs
    }

    /// Backpropagate `dh_seq` (gradient w.r.t. each step's hidden output).
    /// Returns `[dw, du, db]` and the gradient w.r.t. each step's input.
    fn backward(&self, steps: &[StepCache], dh_seq: &[Array2<f64>]) -> ([Array2<f64>; 3], Vec<Array2<f64>>) {
        let mut dw = Array2::zeros(self.w.raw_dim());
        let mut du = Array2::zeros(self.u.raw_dim());
        let mut db = Array2::zeros(self.b.raw_dim());
        let mut dxs = vec![Array2::zeros((0, 0)); steps.len()];

        let batch = steps.first().map_or(0, |s| s.h.nrows());
        let mut dh_next = Array2::zeros((batch, self.hidden));
        let mut dc_next = Array2::zeros((batch, self.hidden));

        for (t, step) in steps.iter().enumerate().rev() {
            let dh = &dh_seq[t] + &dh_next;

            let d_o = &dh * &step.tanh_c;
            let dc = &dh * &step.o * &step.tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
            let d_f = &dc * &step.c_prev;
            let d_i = &dc * &step.g;
            let d_g = &dc * &step.i;
            dc_next = &dc * &step.f;

            let dz_i = d_i * &step.i.mapv(|v| v * (1.0 - v));
            let dz_f = d_f * &step.f.mapv(|v| v * (1.0 - v));
            let dz_g = d_g * &step.g.mapv(|v| 1.0 - v * v);
            let dz_o = d_o * &step.o.mapv(|v| v * (1.0 - v));
            let dz = concatenate![Axis(1), dz_i, dz_f, dz_g, dz_o];

            dw += &step.x.t().dot(&dz);
            du += &step.h_prev.t().dot(&dz);
            db += &dz.sum_axis(Axis(0)).insert_axis(Axis(0));

            dxs[t] = dz.dot(&self.w.t());
            dh_next = dz.dot(&self.u.t());
        }

        ([dw, du, db], dxs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Dense {
    w: Array2<f64>,
    b: Array2<f64>,
}

impl Dense {
    fn new(input: usize, output: usize, rng: &mut StdRng) -> Self {
        Self {
            w: glorot_uniform(input, output, rng),
            b: Array2::zeros((1, output)),
        }
    }

    fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        x.dot(&self.w) + &self.b
    }
}

/// Loss, metric and parameter gradients for one batch
pub struct BatchGradients {
    pub loss: f64,
    pub mae: f64,
    /// Same order as [`Network::params_mut`]
    pub grads: Vec<Array2<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    layers: Vec<LstmLayer>,
    hidden: Dense,
    output: Dense,
    dropout: f64,
}

impl Network {
    pub fn new(n_features: usize, hidden_units: &[usize], dense_units: usize, dropout: f64, rng: &mut StdRng) -> Self {
        let mut layers = Vec::with_capacity(hidden_units.len());
        let mut input = n_features;
        for &units in hidden_units {
            layers.push(LstmLayer::new(input, units, rng));
            input = units;
        }

        Self {
            layers,
            hidden: Dense::new(input, dense_units, rng),
            output: Dense::new(dense_units, 1, rng),
            dropout,
        }
    }

    /// Every trainable matrix in a fixed order
    pub fn params_mut(&mut self) -> Vec<&mut Array2<f64>> {
        let mut params = Vec::with_capacity(3 * self.layers.len() + 4);
        for LstmLayer { w, u, b, .. } in self.layers.iter_mut() {
            params.extend([w, u, b]);
        }
        params.extend([&mut self.hidden.w, &mut self.hidden.b, &mut self.output.w, &mut self.output.b]);
        params
    }

    pub fn param_shapes(&self) -> Vec<(usize, usize)> {
        let mut shapes: Vec<(usize, usize)> = self
            .layers
            .iter()
            .flat_map(|l| [l.w.dim(), l.u.dim(), l.b.dim()])
            .collect();
        shapes.extend([self.hidden.w.dim(), self.hidden.b.dim(), self.output.w.dim(), self.output.b.dim()]);
        shapes
    }

    fn split_steps(x: ArrayView3<f64>) -> Vec<Array2<f64>> {
        x.axis_iter(Axis(1)).map(|step| step.to_owned()).collect()
    }

    /// Predict a batch of windows shaped `(batch, timesteps, features)`
    pub fn predict(&self, x: ArrayView3<f64>) -> Array1<f64> {
        let mut out = Vec::with_capacity(x.len_of(Axis(0)));

        for chunk in x.axis_chunks_iter(Axis(0), PREDICT_CHUNK) {
            let batch = chunk.len_of(Axis(0));
            let mut seq = Self::split_steps(chunk);
            for layer in &self.layers {
                seq = layer.run(&seq);
            }
            let last = seq.pop().unwrap_or_else(|| Array2::zeros((batch, self.hidden.w.nrows())));
            let a = self.hidden.forward(&last).mapv(|v| v.max(0.0));
            out.extend(self.output.forward(&a).column(0).iter().copied());
        }

        Array1::from(out)
    }

    /// Forward and backward pass over one batch with MSE loss.
    ///
    /// Dropout is applied only when `rng` is given.
    pub fn gradients(&self, x: ArrayView3<f64>, y: ArrayView1<f64>, mut rng: Option<&mut StdRng>) -> BatchGradients {
        let batch = x.len_of(Axis(0));
        let active = self.dropout > 0.0 && rng.is_some();

        // forward through the recurrent stack
        let mut inputs = Self::split_steps(x);
        let mut caches: Vec<Vec<StepCache>> = Vec::with_capacity(self.layers.len());
        let mut masks: Vec<Vec<Array2<f64>>> = Vec::with_capacity(self.layers.len());
        let mut last_hidden = Array2::zeros((batch, self.hidden.w.nrows()));

        for (li, layer) in self.layers.iter().enumerate() {
            let steps = layer.forward(&inputs);
            let is_last = li + 1 == self.layers.len();

            let outputs: Vec<Array2<f64>> = if is_last {
                steps.last().map(|s| s.h.clone()).into_iter().collect()
            } else {
                steps.iter().map(|s| s.h.clone()).collect()
            };

            let layer_masks: Vec<Array2<f64>> = match rng.as_deref_mut() {
                Some(r) if active => outputs
                    .iter()
                    .map(|o| dropout_mask(o.dim(), self.dropout, r))
                    .collect(),
                _ => Vec::new(),
            };
            let dropped: Vec<Array2<f64>> = if layer_masks.is_empty() {
                outputs
            } else {
                outputs.iter().zip(&layer_masks).map(|(o, m)| o * m).collect()
            };

            if is_last {
                if let Some(h) = dropped.into_iter().next() {
                    last_hidden = h;
                }
            } else {
                inputs = dropped;
            }
            caches.push(steps);
            masks.push(layer_masks);
        }

        // dense head
        let pre = self.hidden.forward(&last_hidden);
        let act = pre.mapv(|v| v.max(0.0));
        let pred = self.output.forward(&act);

        let diff = &pred.column(0) - &y;
        let n = batch.max(1) as f64;
        let loss = diff.mapv(|d| d * d).sum() / n;
        let mae = diff.mapv(f64::abs).sum() / n;

        let d_pred = diff.mapv(|d| 2.0 * d / n).insert_axis(Axis(1));
        let d_out_w = act.t().dot(&d_pred);
        let d_out_b = d_pred.sum_axis(Axis(0)).insert_axis(Axis(0));

        let mut d_pre = d_pred.dot(&self.output.w.t());
        Zip::from(&mut d_pre).and(&pre).for_each(|d, &p| {
            if p <= 0.0 {
                *d = 0.0;
            }
        });
        let d_hidden_w = last_hidden.t().dot(&d_pre);
        let d_hidden_b = d_pre.sum_axis(Axis(0)).insert_axis(Axis(0));
        let d_last = d_pre.dot(&self.hidden.w.t());

        // back through the recurrent stack
        let mut layer_grads: Vec<[Array2<f64>; 3]> = Vec::with_capacity(self.layers.len());
        let mut dh_seq: Vec<Array2<f64>> = Vec::new();

        for (li, layer) in self.layers.iter().enumerate().rev() {
            let steps = &caches[li];
            let is_last = li + 1 == self.layers.len();

            if is_last {
                let d_last = match masks[li].first() {
                    Some(m) => &d_last * m,
                    None => d_last.clone(),
                };
                dh_seq = vec![Array2::zeros((batch, layer.hidden)); steps.len()];
                if let Some(slot) = dh_seq.last_mut() {
                    *slot = d_last;
                }
            }

            let (grads, dxs) = layer.backward(steps, &dh_seq);
            layer_grads.push(grads);

            if li > 0 {
                let below = &masks[li - 1];
                dh_seq = if below.is_empty() {
                    dxs
                } else {
                    dxs.iter().zip(below).map(|(d, m)| d * m).collect()
                };
            }
        }

        let mut grads = Vec::with_capacity(3 * self.layers.len() + 4);
        for g in layer_grads.into_iter().rev() {
            grads.extend(g);
        }
        grads.extend([d_hidden_w, d_hidden_b, d_out_w, d_out_b]);

        BatchGradients { loss, mae, grads }
    }
}

/// Adam optimizer state
#[derive(Debug, Clone)]
pub struct Adam {
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: i32,
    m: Vec<Array2<f64>>,
    v: Vec<Array2<f64>>,
}

impl Adam {
    pub fn new(network: &Network) -> Self {
        let zeros: Vec<Array2<f64>> = network.param_shapes().into_iter().map(Array2::zeros).collect();
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
            m: zeros.clone(),
            v: zeros,
        }
    }

    pub fn step(&mut self, network: &mut Network, grads: &[Array2<f64>], learning_rate: f64) {
        self.t += 1;
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let lr_t = learning_rate * (1.0 - b2.powi(self.t)).sqrt() / (1.0 - b1.powi(self.t));

        for (((param, grad), m), v) in network
            .params_mut()
            .into_iter()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            Zip::from(param).and(grad).and(m).and(v).for_each(|p, &g, m, v| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + eps);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3};
    use rand::SeedableRng;

    fn tiny(dropout: f64) -> Network {
        let mut rng = StdRng::seed_from_u64(3);
        Network::new(3, &[4, 3], 5, dropout, &mut rng)
    }

    fn batch() -> (Array3<f64>, Array1<f64>) {
        let x = Array3::from_shape_fn((4, 5, 3), |(b, t, f)| ((b * 7 + t * 3 + f) % 11) as f64 / 11.0);
        let y = Array1::from(vec![0.1, 0.4, 0.7, 0.2]);
        (x, y)
    }

    fn loss_of(net: &Network, x: &Array3<f64>, y: &Array1<f64>) -> f64 {
        net.gradients(x.view(), y.view(), None).loss
    }

    #[test]
    fn test_shapes() {
        let mut net = tiny(0.0);
        assert_eq!(
            net.param_shapes(),
            vec![(3, 16), (4, 16), (1, 16), (4, 12), (3, 12), (1, 12), (3, 5), (1, 5), (5, 1), (1, 1)]
        );
        assert_eq!(net.params_mut().len(), 10);

        let (x, _) = batch();
        assert_eq!(net.predict(x.view()).len(), 4);
    }

    #[test]
    fn test_forget_bias_initialized_to_one() {
        let net = tiny(0.0);
        let b = &net.layers[0].b;
        assert!(b.slice(s![.., 0..4]).iter().all(|&v| v == 0.0));
        assert!(b.slice(s![.., 4..8]).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_predict_matches_gradient_forward() {
        let net = tiny(0.0);
        let (x, y) = batch();
        let pred = net.predict(x.view());
        let mse = (&pred - &y).mapv(|d| d * d).mean().unwrap();
        assert!((mse - loss_of(&net, &x, &y)).abs() < 1e-12);
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let net = tiny(0.0);
        let (x, y) = batch();
        let analytic = net.gradients(x.view(), y.view(), None).grads;
        let eps = 1e-6;

        let n_params = net.param_shapes().len();
        for p in 0..n_params {
            let shape = net.param_shapes()[p];
            // check a few entries of every matrix
            for &(r, c) in &[(0, 0), (shape.0 - 1, shape.1 - 1), (shape.0 / 2, shape.1 / 2)] {
                let mut plus = net.clone();
                plus.params_mut()[p][[r, c]] += eps;
                let mut minus = net.clone();
                minus.params_mut()[p][[r, c]] -= eps;

                let numeric = (loss_of(&plus, &x, &y) - loss_of(&minus, &x, &y)) / (2.0 * eps);
                let a = analytic[p][[r, c]];
                assert!(
                    (numeric - a).abs() < 1e-6 + 1e-4 * a.abs().max(numeric.abs()),
                    "param {} [{}, {}]: analytic {} vs numeric {}",
                    p,
                    r,
                    c,
                    a,
                    numeric
                );
            }
        }
    }

    #[test]
    fn test_dropout_only_with_rng() {
        let net = tiny(0.5);
        let (x, y) = batch();

        let plain = net.gradients(x.view(), y.view(), None).loss;
        assert_eq!(plain, loss_of(&net, &x, &y));

        let mut rng = StdRng::seed_from_u64(9);
        let dropped = net.gradients(x.view(), y.view(), Some(&mut rng)).loss;
        assert_ne!(plain, dropped);
    }

    #[test]
    fn test_adam_reduces_loss() {
        let mut net = tiny(0.0);
        let (x, y) = batch();
        let mut adam = Adam::new(&net);
        let before = loss_of(&net, &x, &y);

        for _ in 0..200 {
            let g = net.gradients(x.view(), y.view(), None);
            adam.step(&mut net, &g.grads, 0.01);
        }
        let after = loss_of(&net, &x, &y);
        assert!(after < before * 0.5, "loss {} -> {}", before, after);
    }
}
