use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&plex_operator::resources::Plex::crd())?);
    Ok(())
}
