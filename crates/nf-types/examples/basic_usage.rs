use nf_types::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("NestFit Basic Usage Example");

    // Two free centres tied together plus a fixed intensity
    let mut model = ModelMapper::new()
        .with_prior("centre_0", Prior::uniform(0.0, 1.0))
        .with_prior("centre_1", Prior::uniform(0.0, 1.0))
        .with_constant("intensity", 1.0);
    model.tie("centre_1", "centre_0")?;
    println!("Model has {} free dimension(s)", model.prior_count());
    print!("{}", model.info());

    // Map a unit-cube point to an instance
    let instance = model.instance_from_unit_vector(&[0.3])?;
    for (name, value) in instance.iter() {
        println!("  {name} = {value}");
    }

    // Build samples by hand, as a search would
    let parameters: Vec<Vec<f64>> = (0..=10).map(|i| vec![i as f64 / 10.0]).collect();
    let log_likelihoods: Vec<f64> = parameters
        .iter()
        .map(|v| -0.5 * ((v[0] - 0.4) / 0.1).powi(2))
        .collect();
    let n = parameters.len();
    let samples = Samples::new(
        model.clone(),
        parameters,
        log_likelihoods,
        vec![0.0; n],
        vec![1.0; n],
        None,
    )?;
    println!("Collected {} samples", samples.total_samples());

    let result = FitResult::new(samples, Some(model));
    println!("{result}");

    // Chain into the next stage
    let next = result.model_absolute(0.05)?;
    print!("Next stage priors:\n{}", next.info());

    let mut results = ResultsCollection::new();
    results.add("stage_1", result);
    match results.from_name("stage_2") {
        Ok(_) => println!("unexpected result"),
        Err(e) => println!("Lookup failed as expected: {e}"),
    }

    Ok(())
}
