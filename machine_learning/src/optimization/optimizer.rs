/// A parameter update rule.
pub trait Optimizer {
    /// Takes one step using `grad`.
    ///
    /// # Arguments
    /// * `params` - The parameters that are going to be modified.
    /// * `grad` - The gradient used for taking the step, same length as `params`.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]);
}
