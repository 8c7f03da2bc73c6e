//! Single-layer recurrent regressor
//!
//! recurrent(units) -> dropout -> dense(dense_units, relu) -> dense(1)
//!
//! The recurrent layer is either an LSTM or a plain tanh cell. Both share the
//! same parameter layout: an input kernel, a recurrent kernel and a bias, with
//! one block of `units` rows per gate (i, f, g, o for the LSTM).

use ndarray::{Array, Array1, Array2, Axis, Dimension, Zip, s};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ModelFamily;

/// Layer sizes of a [`RecurrentNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkShape {
    pub look_back: usize,
    pub units: usize,
    pub dense_units: usize,
    pub dropout: f64,
}

impl Default for NetworkShape {
    fn default() -> Self {
        Self {
            look_back: super::LOOK_BACK,
            units: 32,
            dense_units: 16,
            dropout: 0.1,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn glorot_uniform<R: Rng + ?Sized>(rng: &mut R, rows: usize, cols: usize) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.random_range(-limit..limit))
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    a.view()
        .insert_axis(Axis(1))
        .dot(&b.view().insert_axis(Axis(0)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecurrentLayer {
    family: ModelFamily,
    units: usize,
    /// Input kernel, one column since the input is univariate.
    w: Array1<f64>,
    u: Array2<f64>,
    b: Array1<f64>,
}

/// Activations of one time step, kept for backpropagation.
struct StepCache {
    x: f64,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    /// Post-activation gate values; for the plain cell this is the new state.
    gates: Array1<f64>,
    tanh_c: Array1<f64>,
}

impl RecurrentLayer {
    fn new<R: Rng + ?Sized>(family: ModelFamily, units: usize, rng: &mut R) -> Self {
        let rows = family.gate_count() * units;
        let w = glorot_uniform(rng, rows, 1).column(0).to_owned();
        let u = glorot_uniform(rng, rows, units);
        let mut b = Array1::zeros(rows);
        if family == ModelFamily::Lstm {
            b.slice_mut(s![units..2 * units]).fill(1.0);
        }
        Self {
            family,
            units,
            w,
            u,
            b,
        }
    }

    fn step(
        &self,
        x: f64,
        h: &Array1<f64>,
        c: &Array1<f64>,
    ) -> (Array1<f64>, Array1<f64>, StepCache) {
        let n = self.units;
        let mut a = &self.w * x + self.u.dot(h) + &self.b;

        let (h_next, c_next, tanh_c) = match self.family {
            ModelFamily::Lstm => {
                a.slice_mut(s![0..2 * n]).mapv_inplace(sigmoid);
                a.slice_mut(s![2 * n..3 * n]).mapv_inplace(f64::tanh);
                a.slice_mut(s![3 * n..]).mapv_inplace(sigmoid);

                let i = a.slice(s![0..n]);
                let f = a.slice(s![n..2 * n]);
                let g = a.slice(s![2 * n..3 * n]);
                let o = a.slice(s![3 * n..]);

                let c_next = &f * c + &(&i * &g);
                let tanh_c = c_next.mapv(f64::tanh);
                let h_next = &o * &tanh_c;
                (h_next, c_next, tanh_c)
            }
            ModelFamily::Rnn => {
                a.mapv_inplace(f64::tanh);
                (a.clone(), Array1::zeros(0), Array1::zeros(0))
            }
        };

        let cache = StepCache {
            x,
            h_prev: h.clone(),
            c_prev: c.clone(),
            gates: a,
            tanh_c,
        };
        (h_next, c_next, cache)
    }

    /// Run the whole sequence from a zero state, returning the final hidden state.
    fn forward(&self, inputs: &[f64]) -> (Array1<f64>, Vec<StepCache>) {
        let mut h = Array1::zeros(self.units);
        let mut c = match self.family {
            ModelFamily::Lstm => Array1::zeros(self.units),
            ModelFamily::Rnn => Array1::zeros(0),
        };
        let mut caches = Vec::with_capacity(inputs.len());
        for &x in inputs {
            let (h_next, c_next, cache) = self.step(x, &h, &c);
            caches.push(cache);
            h = h_next;
            c = c_next;
        }
        (h, caches)
    }

    fn backward(&self, caches: &[StepCache], dh_last: Array1<f64>, grads: &mut RecurrentGrads) {
        let n = self.units;
        let mut dh = dh_last;
        let mut dc: Array1<f64> = Array1::zeros(n);

        for cache in caches.iter().rev() {
            let da = match self.family {
                ModelFamily::Lstm => {
                    let a = &cache.gates;
                    let i = a.slice(s![0..n]);
                    let f = a.slice(s![n..2 * n]);
                    let g = a.slice(s![2 * n..3 * n]);
                    let o = a.slice(s![3 * n..]);

                    let d_o = &dh * &cache.tanh_c;
                    let dtanh = cache.tanh_c.mapv(|t| 1.0 - t * t);
                    let dc_total = &dc + &(&(&dh * &o) * &dtanh);

                    let d_i = &dc_total * &g;
                    let d_f = &dc_total * &cache.c_prev;
                    let d_g = &dc_total * &i;
                    dc = &dc_total * &f;

                    let mut da = Array1::zeros(4 * n);
                    da.slice_mut(s![0..n])
                        .assign(&(&d_i * &i.mapv(|v| v * (1.0 - v))));
                    da.slice_mut(s![n..2 * n])
                        .assign(&(&d_f * &f.mapv(|v| v * (1.0 - v))));
                    da.slice_mut(s![2 * n..3 * n])
                        .assign(&(&d_g * &g.mapv(|v| 1.0 - v * v)));
                    da.slice_mut(s![3 * n..])
                        .assign(&(&d_o * &o.mapv(|v| v * (1.0 - v))));
                    da
                }
                ModelFamily::Rnn => &dh * &cache.gates.mapv(|v| 1.0 - v * v),
            };

            grads.w.scaled_add(cache.x, &da);
            grads.u += &outer(&da, &cache.h_prev);
            grads.b += &da;
            dh = self.u.t().dot(&da);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Activation {
    Relu,
    Linear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DenseLayer {
    weights: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

impl DenseLayer {
    fn new<R: Rng + ?Sized>(
        inputs: usize,
        outputs: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        Self {
            weights: glorot_uniform(rng, outputs, inputs),
            bias: Array1::zeros(outputs),
            activation,
        }
    }

    fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        let z = self.weights.dot(x) + &self.bias;
        match self.activation {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Linear => z,
        }
    }
}

#[derive(Debug, Clone)]
struct RecurrentGrads {
    w: Array1<f64>,
    u: Array2<f64>,
    b: Array1<f64>,
}

#[derive(Debug, Clone)]
struct DenseGrads {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

/// Gradient (or optimizer moment) buffers mirroring every trainable tensor.
#[derive(Debug, Clone)]
pub(crate) struct Gradients {
    recurrent: RecurrentGrads,
    hidden: DenseGrads,
    output: DenseGrads,
}

impl Gradients {
    fn zeros_like(net: &RecurrentNetwork) -> Self {
        Self {
            recurrent: RecurrentGrads {
                w: Array1::zeros(net.recurrent.w.raw_dim()),
                u: Array2::zeros(net.recurrent.u.raw_dim()),
                b: Array1::zeros(net.recurrent.b.raw_dim()),
            },
            hidden: DenseGrads {
                weights: Array2::zeros(net.hidden.weights.raw_dim()),
                bias: Array1::zeros(net.hidden.bias.raw_dim()),
            },
            output: DenseGrads {
                weights: Array2::zeros(net.output.weights.raw_dim()),
                bias: Array1::zeros(net.output.bias.raw_dim()),
            },
        }
    }
}

/// Adam optimizer state for one network.
#[derive(Debug, Clone)]
pub(crate) struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    step: i32,
    m: Gradients,
    v: Gradients,
}

impl Adam {
    pub(crate) fn new(net: &RecurrentNetwork, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            m: Gradients::zeros_like(net),
            v: Gradients::zeros_like(net),
        }
    }

    fn apply(&mut self, net: &mut RecurrentNetwork, grads: &Gradients) {
        self.step += 1;
        let size = StepSize {
            lr_t: self.learning_rate * (1.0 - self.beta2.powi(self.step)).sqrt()
                / (1.0 - self.beta1.powi(self.step)),
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
        };
        let (m, v) = (&mut self.m, &mut self.v);

        macro_rules! update {
            ($($layer:ident . $param:ident),+) => {
                $(adam_step(
                    &mut net.$layer.$param,
                    &grads.$layer.$param,
                    &mut m.$layer.$param,
                    &mut v.$layer.$param,
                    size,
                );)+
            };
        }

        update!(recurrent.w, recurrent.u, recurrent.b);
        update!(hidden.weights, hidden.bias, output.weights, output.bias);
    }
}

/// Bias-corrected learning rate and decay rates for one Adam step.
#[derive(Debug, Clone, Copy)]
struct StepSize {
    lr_t: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
}

fn adam_step<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    size: StepSize,
) {
    let StepSize {
        lr_t,
        beta1,
        beta2,
        epsilon,
    } = size;
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + epsilon);
        });
}

/// Trainable recurrent regressor mapping a window of normalized values to the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrentNetwork {
    shape: NetworkShape,
    recurrent: RecurrentLayer,
    hidden: DenseLayer,
    output: DenseLayer,
}

impl RecurrentNetwork {
    pub fn new<R: Rng + ?Sized>(family: ModelFamily, shape: NetworkShape, rng: &mut R) -> Self {
        let recurrent = RecurrentLayer::new(family, shape.units, rng);
        let hidden = DenseLayer::new(shape.units, shape.dense_units, Activation::Relu, rng);
        let output = DenseLayer::new(shape.dense_units, 1, Activation::Linear, rng);
        Self {
            shape,
            recurrent,
            hidden,
            output,
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.recurrent.family
    }

    pub fn shape(&self) -> &NetworkShape {
        &self.shape
    }

    /// Inference pass; dropout is inactive.
    pub fn predict(&self, window: &[f64]) -> f64 {
        let (h, _) = self.recurrent.forward(window);
        let hidden = self.hidden.forward(&h);
        self.output.forward(&hidden)[0]
    }

    /// One optimizer step over a mini-batch; returns the batch mean squared error.
    pub(crate) fn train_batch<R: Rng + ?Sized>(
        &mut self,
        batch: &[(&[f64], f64)],
        optimizer: &mut Adam,
        rng: &mut R,
    ) -> f64 {
        if batch.is_empty() {
            return 0.0;
        }

        let mut grads = Gradients::zeros_like(self);
        let scale = 1.0 / batch.len() as f64;
        let keep = 1.0 - self.shape.dropout;
        let mut loss = 0.0;

        for &(window, target) in batch {
            let (h, caches) = self.recurrent.forward(window);

            let mask: Array1<f64> = if self.shape.dropout > 0.0 && keep > 0.0 {
                Array1::from_shape_fn(h.len(), |_| {
                    if rng.random::<f64>() < self.shape.dropout {
                        0.0
                    } else {
                        1.0 / keep
                    }
                })
            } else {
                Array1::ones(h.len())
            };
            let dropped = &h * &mask;

            let hidden = self.hidden.forward(&dropped);
            let prediction = self.output.forward(&hidden)[0];
            let error = prediction - target;
            loss += error * error * scale;

            let d_out = 2.0 * error * scale;
            grads.output.weights.row_mut(0).scaled_add(d_out, &hidden);
            grads.output.bias[0] += d_out;

            let d_hidden = self.output.weights.row(0).mapv(|w| w * d_out);
            let d_z = Zip::from(&d_hidden)
                .and(&hidden)
                .map_collect(|&d, &a| if a > 0.0 { d } else { 0.0 });
            grads.hidden.weights += &outer(&d_z, &dropped);
            grads.hidden.bias += &d_z;

            let d_h = self.hidden.weights.t().dot(&d_z) * &mask;
            self.recurrent.backward(&caches, d_h, &mut grads.recurrent);
        }

        optimizer.apply(self, &grads);
        loss
    }
}
